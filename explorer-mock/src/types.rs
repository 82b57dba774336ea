//! Wire types served by the mock explorer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub unit: String,
    pub message_index: u32,
    pub output_index: u32,
    pub address: String,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default = "default_denomination")]
    pub denomination: u32,
    pub stable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_denomination() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceEntry {
    pub stable: u64,
    pub pending: u64,
    pub stable_outputs_count: u32,
    pub pending_outputs_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub unit: String,
    pub action: String,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    pub addresses: Vec<String>,
    pub stable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<chrono::DateTime<chrono::Utc>>,
    pub row_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint: Option<serde_json::Value>,
    pub stable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mci: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadataRecord {
    pub asset: String,
    pub ticker: String,
    pub name: String,
    pub decimals: u32,
    pub registry_address: String,
}

// --- seeding / control bodies ---------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SeedUtxoBody {
    pub address: String,
    pub amount: u64,
    pub asset: Option<String>,
    #[serde(default = "default_stable")]
    pub stable: bool,
}

fn default_stable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SeedActivityBody {
    pub address: String,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct StabilizeBody {
    pub units: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailBroadcastBody {
    pub fail: bool,
}
