use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::state::LedgerState;
use crate::types::*;

#[derive(Debug, Deserialize)]
pub struct AddressesQuery {
    pub addresses: String,
    pub asset: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "lastRowId")]
    pub last_row_id: Option<u64>,
}

impl AddressesQuery {
    fn list(&self) -> Vec<String> {
        self.addresses.split(',').map(str::to_string).collect()
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn get_utxos(
    State(state): State<Arc<LedgerState>>,
    Query(query): Query<AddressesQuery>,
) -> Json<Vec<UtxoRecord>> {
    Json(state.utxos_for(&query.list(), query.asset.as_deref()))
}

pub async fn get_balance(
    State(state): State<Arc<LedgerState>>,
    Query(query): Query<AddressesQuery>,
) -> Json<BTreeMap<String, BalanceEntry>> {
    let utxos = state.utxos_for(&query.list(), query.asset.as_deref());
    let mut balances: BTreeMap<String, BalanceEntry> = BTreeMap::new();
    for utxo in utxos {
        let key = utxo.asset.clone().unwrap_or_else(|| "base".to_string());
        let entry = balances.entry(key).or_default();
        if utxo.stable {
            entry.stable += utxo.amount;
            entry.stable_outputs_count += 1;
        } else {
            entry.pending += utxo.amount;
            entry.pending_outputs_count += 1;
        }
    }
    Json(balances)
}

pub async fn get_tx_history(
    State(state): State<Arc<LedgerState>>,
    Query(query): Query<AddressesQuery>,
) -> Json<Vec<HistoryItem>> {
    Json(state.history_for(&query.list(), query.limit, query.last_row_id))
}

pub async fn get_address_activity(
    State(state): State<Arc<LedgerState>>,
    Path(address): Path<String>,
) -> Json<bool> {
    Json(state.activity_for(&address))
}

pub async fn get_transaction(
    State(state): State<Arc<LedgerState>>,
    Path(unit): Path<String>,
) -> Result<Json<TxRecord>, StatusCode> {
    state.transaction(&unit).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct RegistriesQuery {
    pub registries: String,
}

pub async fn get_asset_metadata(
    State(state): State<Arc<LedgerState>>,
    Query(query): Query<RegistriesQuery>,
) -> Json<Vec<AssetMetadataRecord>> {
    let registries: Vec<String> = query.registries.split(',').map(str::to_string).collect();
    Json(state.assets(&registries))
}

pub async fn broadcast(
    State(state): State<Arc<LedgerState>>,
    Json(joint): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.broadcast(joint) {
        Ok(unit) => Ok(Json(serde_json::json!({ "unit": unit }))),
        Err(message) => Err((StatusCode::BAD_REQUEST, message)),
    }
}

// --- seeding and control, for tests and local development ------------------

pub async fn seed_utxo(
    State(state): State<Arc<LedgerState>>,
    Json(body): Json<SeedUtxoBody>,
) -> Json<UtxoRecord> {
    Json(state.seed_utxo(body.address, body.amount, body.asset, body.stable))
}

pub async fn seed_activity(
    State(state): State<Arc<LedgerState>>,
    Json(body): Json<SeedActivityBody>,
) -> Json<serde_json::Value> {
    state.seed_activity(body.address, body.active);
    Json(serde_json::json!({ "success": true }))
}

pub async fn stabilize(
    State(state): State<Arc<LedgerState>>,
    Json(body): Json<StabilizeBody>,
) -> Json<serde_json::Value> {
    state.stabilize(&body.units);
    Json(serde_json::json!({ "success": true }))
}

pub async fn fail_broadcast(
    State(state): State<Arc<LedgerState>>,
    Json(body): Json<FailBroadcastBody>,
) -> Json<serde_json::Value> {
    state.set_fail_broadcast(body.fail);
    Json(serde_json::json!({ "success": true }))
}
