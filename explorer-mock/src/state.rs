//! In-memory ledger state backing the mock.
//!
//! Stands in for a Bitcoin-Core-style backend: broadcast consumes inputs
//! and creates outputs, seeding endpoints fabricate funded addresses, and
//! stabilisation is an explicit control call.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::types::{AssetMetadataRecord, HistoryItem, TxRecord, UtxoRecord};

#[derive(Default)]
pub struct LedgerState {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    utxos: Vec<UtxoRecord>,
    activity: HashMap<String, bool>,
    transactions: HashMap<String, (serde_json::Value, bool)>,
    history: Vec<HistoryItem>,
    assets: Vec<AssetMetadataRecord>,
    fail_broadcast: bool,
    next_row_id: u64,
}

fn fake_unit_hash(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(rand::random::<[u8; 8]>());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utxos_for(&self, addresses: &[String], asset: Option<&str>) -> Vec<UtxoRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .utxos
            .iter()
            .filter(|u| addresses.contains(&u.address))
            .filter(|u| u.asset.as_deref() == asset)
            .cloned()
            .collect()
    }

    pub fn activity_for(&self, address: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        *inner.activity.get(address).unwrap_or(&false)
    }

    pub fn transaction(&self, unit: &str) -> Option<TxRecord> {
        let inner = self.inner.lock().unwrap();
        inner.transactions.get(unit).map(|(joint, stable)| TxRecord {
            unit: unit.to_string(),
            joint: Some(joint.clone()),
            stable: *stable,
            mci: None,
            time: Some(Utc::now()),
        })
    }

    pub fn history_for(
        &self,
        addresses: &[String],
        limit: Option<usize>,
        last_row_id: Option<u64>,
    ) -> Vec<HistoryItem> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<HistoryItem> = inner
            .history
            .iter()
            .filter(|h| h.addresses.iter().any(|a| addresses.contains(a)))
            .filter(|h| last_row_id.map_or(true, |id| h.row_id < id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.row_id.cmp(&a.row_id));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    pub fn assets(&self, registries: &[String]) -> Vec<AssetMetadataRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .assets
            .iter()
            .filter(|a| registries.contains(&a.registry_address))
            .cloned()
            .collect()
    }

    /// Accept a joint: consume referenced inputs, credit outputs, record
    /// the transaction and a history row per touched address.
    pub fn broadcast(&self, joint: serde_json::Value) -> Result<String, String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_broadcast {
            return Err("hub configured to fail".to_string());
        }

        let unit_hash = joint
            .get("unit")
            .and_then(|u| u.get("unit"))
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| fake_unit_hash("broadcast"));

        if inner.transactions.contains_key(&unit_hash) {
            return Ok(unit_hash);
        }

        let messages = joint
            .get("unit")
            .and_then(|u| u.get("messages"))
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        let mut touched = Vec::new();
        for message in &messages {
            if message.get("app").and_then(|a| a.as_str()) != Some("payment") {
                continue;
            }
            let Some(payload) = message.get("payload") else { continue };

            if let Some(inputs) = payload.get("inputs").and_then(|i| i.as_array()) {
                for input in inputs {
                    let unit = input.get("unit").and_then(|u| u.as_str()).unwrap_or_default();
                    let mi = input.get("message_index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    let oi = input.get("output_index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    inner.utxos.retain(|u| {
                        !(u.unit == unit && u.message_index == mi && u.output_index == oi)
                    });
                }
            }
            if let Some(outputs) = payload.get("outputs").and_then(|o| o.as_array()) {
                for (index, output) in outputs.iter().enumerate() {
                    let address = output
                        .get("address")
                        .and_then(|a| a.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let amount = output.get("amount").and_then(|a| a.as_u64()).unwrap_or(0);
                    touched.push(address.clone());
                    inner.activity.insert(address.clone(), true);
                    inner.utxos.push(UtxoRecord {
                        unit: unit_hash.clone(),
                        message_index: 0,
                        output_index: index as u32,
                        address,
                        amount,
                        asset: None,
                        denomination: 1,
                        stable: false,
                        time: Some(Utc::now()),
                    });
                }
            }
        }

        inner.next_row_id += 1;
        let row_id = inner.next_row_id;
        inner.history.push(HistoryItem {
            unit: unit_hash.clone(),
            action: "received".to_string(),
            amount: 0,
            asset: None,
            addresses: touched,
            stable: false,
            time: Some(Utc::now()),
            row_id,
        });
        inner.transactions.insert(unit_hash.clone(), (joint, false));
        Ok(unit_hash)
    }

    // --- seeding and control ---------------------------------------------

    pub fn seed_utxo(
        &self,
        address: String,
        amount: u64,
        asset: Option<String>,
        stable: bool,
    ) -> UtxoRecord {
        let mut inner = self.inner.lock().unwrap();
        let utxo = UtxoRecord {
            unit: fake_unit_hash(&address),
            message_index: 0,
            output_index: 0,
            address: address.clone(),
            amount,
            asset,
            denomination: 1,
            stable,
            time: Some(Utc::now()),
        };
        inner.activity.insert(address, true);
        inner.utxos.push(utxo.clone());
        utxo
    }

    pub fn seed_activity(&self, address: String, active: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.activity.insert(address, active);
    }

    pub fn stabilize(&self, units: &[String]) {
        let mut inner = self.inner.lock().unwrap();
        for unit in units {
            if let Some((_, stable)) = inner.transactions.get_mut(unit) {
                *stable = true;
            }
        }
        for utxo in inner.utxos.iter_mut() {
            if units.contains(&utxo.unit) {
                utxo.stable = true;
            }
        }
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_broadcast = fail;
    }
}
