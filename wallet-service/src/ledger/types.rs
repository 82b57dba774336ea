//! Wire types shared with the explorer and hub.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNIT_VERSION: &str = "1.0";
pub const UNIT_ALT: &str = "1";

/// One author of a unit: a paying (or declaring) address plus its
/// authentifiers, signatures keyed by signing path within the address
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub address: String,
    #[serde(default)]
    pub authentifiers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub app: String,
    pub payload_location: String,
    pub payload_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// A ledger unit: the DAG analogue of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub version: String,
    pub alt: String,
    pub authors: Vec<Author>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub parent_units: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ball_unit: Option<String>,
    pub headers_commission: u64,
    pub payload_commission: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Unit hash, set once the unit is finalised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joint {
    pub unit: Unit,
}

/// An unspent output as reported by the explorer.
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
    pub time: Option<DateTime<Utc>>,
}

fn default_denomination() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub stable: u64,
    pub pending: u64,
    pub stable_outputs_count: u32,
    pub pending_outputs_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub unit: String,
    /// "sent" or "received" relative to the queried addresses.
    pub action: String,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    pub addresses: Vec<String>,
    pub stable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub row_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub asset: Option<String>,
    pub limit: Option<usize>,
    pub last_row_id: Option<u64>,
    pub since_mci: Option<u64>,
    pub unit: Option<String>,
}

/// A transaction as read back from the explorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint: Option<Joint>,
    pub stable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mci: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadataRecord {
    pub asset: String,
    pub ticker: String,
    pub name: String,
    pub decimals: u32,
    pub registry_address: String,
}

/// Events pushed by the local ledger node into the monitor pipeline.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    NewJoint(Joint),
    TransactionsBecameStable { units: Vec<String> },
    MciBecameStable { mci: u64, units: Vec<String> },
}
