use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Pending,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationStrategy {
    Legacy,
    Bip44,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Normal,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
}

/// A shared wallet: roster of copayers plus the parameters that pin address
/// derivation. Once `status` reaches `Complete` the copayer list and the
/// derived public-key ring are frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub name: String,
    pub m: usize,
    pub n: usize,
    pub coin: String,
    pub network: Network,
    pub derivation_strategy: DerivationStrategy,
    pub address_type: AddressType,
    pub single_address: bool,
    /// Creation public key; join signatures must verify under it.
    pub pub_key: String,
    pub definition_template: serde_json::Value,
    pub copayers: Vec<Copayer>,
    pub scan_status: ScanStatus,
    pub status: WalletStatus,
    pub created_on: DateTime<Utc>,
}

impl Wallet {
    pub fn is_complete(&self) -> bool {
        self.status == WalletStatus::Complete
    }

    pub fn is_shared(&self) -> bool {
        self.n > 1
    }

    pub fn copayer(&self, copayer_id: &str) -> Option<&Copayer> {
        self.copayers.iter().find(|c| c.id == copayer_id)
    }

    /// Ordered xpubs of all joined copayers.
    pub fn public_key_ring(&self) -> Vec<String> {
        self.copayers.iter().map(|c| c.xpub.clone()).collect()
    }

    /// Rejections needed to finalise a proposal as rejected.
    pub fn required_rejections(&self) -> usize {
        self.m.min(self.n - self.m + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestKey {
    pub key: String,
    pub signature: String,
}

/// A participant of a shared wallet. The id is the hash of the extended
/// public key, so one xpub can join at most one wallet service-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Copayer {
    pub id: String,
    pub name: String,
    pub xpub: String,
    pub account: u32,
    pub device_id: String,
    /// Request-key history; the first entry is the current key.
    pub request_pub_keys: Vec<RequestKey>,
    pub custom_data: Option<serde_json::Value>,
    pub created_on: DateTime<Utc>,
}

impl Copayer {
    pub fn current_request_key(&self) -> Option<&RequestKey> {
        self.request_pub_keys.first()
    }
}

/// Side index for fast auth lookups: copayer id to wallet binding plus the
/// request-key ring, kept in sync with the wallet roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopayerLookup {
    pub copayer_id: String,
    pub wallet_id: String,
    pub request_pub_keys: Vec<RequestKey>,
    pub is_support_staff: bool,
}
