//! Wire DTOs for the HTTP surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Network, Output, TxApp, TxProposal, Wallet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletBody {
    pub id: Option<String>,
    pub name: String,
    pub m: usize,
    pub n: usize,
    pub pub_key: String,
    pub coin: Option<String>,
    pub network: Option<Network>,
    #[serde(default)]
    pub single_address: bool,
    #[serde(default = "default_true", rename = "supportBIP44")]
    pub support_bip44: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletResponse {
    pub wallet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWalletBody {
    pub wallet_id: String,
    pub device_id: String,
    #[serde(default)]
    pub account: u32,
    pub name: String,
    #[serde(rename = "xPubKey")]
    pub x_pub_key: String,
    pub request_pub_key: String,
    pub copayer_signature: String,
    pub coin: Option<String>,
    pub network: Option<Network>,
    pub custom_data: Option<serde_json::Value>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true", rename = "supportBIP44")]
    pub support_bip44: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWalletResponse {
    pub copayer_id: String,
    pub wallet: Wallet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWalletBody {
    pub name: Option<String>,
    pub copayer_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatusResponse {
    pub wallet: Wallet,
    pub pending_txps: Vec<TxProposal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopayersQuery {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAccessBody {
    pub request_pub_key: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesBody {
    pub email: Option<String>,
    pub language: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateAddressBody {
    #[serde(default)]
    pub ignore_max_gap: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddressesQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub starting_step: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Comma-separated address filter.
    pub addresses: Option<String>,
    pub asset: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "lastRowId")]
    pub last_row_id: Option<u64>,
}

impl LedgerQuery {
    pub fn address_list(&self) -> Option<Vec<String>> {
        self.addresses
            .as_ref()
            .map(|s| s.split(',').map(str::to_string).collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTxBody {
    pub tx_proposal_id: Option<String>,
    pub app: TxApp,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTxBody {
    pub proposal_signature: String,
}

#[derive(Debug, Deserialize)]
pub struct SignaturesBody {
    /// Author address to base64 signature over the unit hash.
    pub signatures: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectTxBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxListQuery {
    pub status: Option<String>,
    pub app: Option<TxApp>,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub limit: Option<usize>,
    pub is_pending: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NoteBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesQuery {
    pub min_ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    pub time_span: Option<i64>,
    pub notification_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PushSubBody {
    pub token: String,
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TxConfirmationBody {
    pub txid: String,
}

#[derive(Debug, Deserialize)]
pub struct FiatRateQuery {
    pub provider: Option<String>,
    pub ts: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: String,
}
