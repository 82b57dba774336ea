use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wallet::AddressType;

/// A derived wallet address. For a given wallet and path the address string,
/// definition and signing paths are fully determined by the public-key ring.
/// `has_activity` is sticky: once on-chain activity is observed it never
/// reverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub wallet_id: String,
    /// Derivation path `m/{change}/{index}`.
    pub path: String,
    pub is_change: bool,
    pub address_type: AddressType,
    /// Multisig definition with per-copayer derived pubkeys substituted in.
    pub definition: serde_json::Value,
    /// Derived pubkey (hex) to signing path within the definition.
    pub signing_paths: BTreeMap<String, String>,
    pub has_activity: bool,
    pub created_on: DateTime<Utc>,
}

impl Address {
    /// Parse `(change, index)` back out of the stored path.
    pub fn path_components(&self) -> Option<(u32, u32)> {
        let mut parts = self.path.strip_prefix("m/")?.split('/');
        let change = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        Some((change, index))
    }
}

pub fn derivation_path(is_change: bool, index: u32) -> String {
    format!("m/{}/{}", if is_change { 1 } else { 0 }, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trip() {
        assert_eq!(derivation_path(false, 7), "m/0/7");
        assert_eq!(derivation_path(true, 0), "m/1/0");
    }
}
