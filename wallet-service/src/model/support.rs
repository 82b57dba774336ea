//! Supporting records: notes, subscriptions, preferences, assets, fiat
//! rates and the broadcast log feeding the UTXO spent view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::proposal::UtxoRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxNote {
    pub wallet_id: String,
    pub txid: String,
    pub body: String,
    pub edited_by: String,
    pub edited_on: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
}

/// Single-shot confirmation watch: deactivated atomically with the
/// TxConfirmation notification it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxConfirmationSub {
    pub wallet_id: String,
    pub copayer_id: String,
    pub txid: String,
    pub is_active: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSub {
    pub copayer_id: String,
    pub token: String,
    pub platform: Option<String>,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub wallet_id: String,
    pub copayer_id: String,
    pub email: Option<String>,
    pub language: Option<String>,
    pub unit: Option<String>,
}

/// Asset metadata upserted by the monitor's registry scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub asset: String,
    pub ticker: String,
    pub name: String,
    pub decimals: u32,
    pub registry_address: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiatRate {
    pub code: String,
    pub provider: String,
    pub value: f64,
    pub ts: DateTime<Utc>,
}

/// Entry of the broadcast-tx log; recently broadcast inputs are treated as
/// spent by the reservation view even before the explorer observes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastLogEntry {
    pub wallet_id: String,
    pub txid: String,
    pub inputs: Vec<UtxoRef>,
    pub broadcasted_on: DateTime<Utc>,
}
