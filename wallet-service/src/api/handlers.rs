//! Request handlers: header-based authentication, body parsing, thin
//! delegation into the service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, OriginalUri, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::auth::{AuthedCopayer, Credentials};
use crate::error::ServiceError;
use crate::ledger::types::{HistoryOptions, Joint};
use crate::model::{Address, Network, Notification, Preferences, ProposalStatus, TxNote, TxProposal, Wallet};
use crate::service::{CreateTxRequest, CreateWalletRequest, JoinWalletRequest, WalletService};
use crate::storage::TxFilter;

use super::limiter::RateLimiter;
use super::types::*;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WalletService>,
    pub limiter: Arc<RateLimiter>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The signed request message is `method|url|body`, with `{}` standing in
/// for an empty body.
fn request_message(method: &str, uri: &OriginalUri, body: &str) -> String {
    let url = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.0.path());
    let body = if body.trim().is_empty() { "{}" } else { body };
    format!("{}|{}|{}", method, url, body)
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    uri: &OriginalUri,
    body: &str,
) -> Result<AuthedCopayer, ServiceError> {
    let copayer_id = header(headers, "x-identity").ok_or(ServiceError::CopayerNotFound)?;
    state.service.authenticate(&Credentials {
        copayer_id,
        message: request_message(method, uri, body),
        signature: header(headers, "x-signature"),
        session: header(headers, "x-session"),
        client_version: header(headers, "x-client-version"),
        wallet_id_override: header(headers, "x-wallet-id"),
    })
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ServiceError> {
    let body = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid request body: {}", e)))
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// --- wallets ---------------------------------------------------------------

pub async fn create_wallet(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: String,
) -> Result<Json<CreateWalletResponse>, ServiceError> {
    if let Some(delay) = state.limiter.check(peer.ip())? {
        tokio::time::sleep(delay).await;
    }

    let req: CreateWalletBody = parse_body(&body)?;
    let wallet_id = state
        .service
        .create_wallet(CreateWalletRequest {
            id: req.id,
            name: req.name,
            m: req.m,
            n: req.n,
            pub_key: req.pub_key,
            coin: req.coin,
            network: req.network.unwrap_or(Network::Main),
            single_address: req.single_address,
            support_bip44: req.support_bip44,
        })
        .await?;
    Ok(Json(CreateWalletResponse { wallet_id }))
}

pub async fn join_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    body: String,
) -> Result<Json<JoinWalletResponse>, ServiceError> {
    let req: JoinWalletBody = parse_body(&body)?;
    if req.wallet_id != wallet_id {
        return Err(ServiceError::BadRequest("wallet id mismatch".to_string()));
    }
    let wallet = state
        .service
        .join_wallet(JoinWalletRequest {
            wallet_id: req.wallet_id,
            name: req.name,
            xpub: req.x_pub_key.clone(),
            request_pub_key: req.request_pub_key,
            copayer_signature: req.copayer_signature,
            device_id: req.device_id,
            account: req.account,
            coin: req.coin,
            network: req.network,
            custom_data: req.custom_data,
            dry_run: req.dry_run,
            support_bip44: req.support_bip44,
        })
        .await?;
    Ok(Json(JoinWalletResponse {
        copayer_id: crate::sigs::copayer_id_from_xpub(&req.x_pub_key),
        wallet,
    }))
}

pub async fn get_wallet_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Result<Json<WalletStatusResponse>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let wallet = state.service.get_wallet(&auth.wallet_id)?;
    let pending_txps = state.service.get_pending_txs(&auth.wallet_id)?;
    Ok(Json(WalletStatusResponse { wallet, pending_txps }))
}

pub async fn get_wallet_from_identifier(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(identifier): Path<String>,
) -> Result<Json<Wallet>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let wallet = state.service.get_wallet_from_identifier_for(&auth, &identifier)?;
    Ok(Json(wallet))
}

pub async fn update_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<Wallet>, ServiceError> {
    let auth = authenticate(&state, &headers, "put", &uri, &body)?;
    let req: UpdateWalletBody = parse_body(&body)?;
    let wallet = state
        .service
        .update_wallet(&auth.wallet_id, &auth.copayer_id, req.name, req.copayer_name)
        .await?;
    Ok(Json(wallet))
}

pub async fn get_copayers(
    State(state): State<AppState>,
    Query(query): Query<CopayersQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let found = state.service.get_copayers_by_device(&query.device_id);
    let copayers: Vec<serde_json::Value> = found
        .into_iter()
        .map(|(wallet_id, copayer)| {
            serde_json::json!({
                "walletId": wallet_id,
                "copayerId": copayer.id,
                "copayerName": copayer.name,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "copayers": copayers })))
}

pub async fn add_access(
    State(state): State<AppState>,
    Path(copayer_id): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let req: AddAccessBody = parse_body(&body)?;
    state
        .service
        .add_access(&copayer_id, req.request_pub_key, req.signature)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// --- preferences -----------------------------------------------------------

pub async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Result<Json<Preferences>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    Ok(Json(state.service.get_preferences(&auth.wallet_id, &auth.copayer_id)))
}

pub async fn save_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<Preferences>, ServiceError> {
    let auth = authenticate(&state, &headers, "put", &uri, &body)?;
    let req: PreferencesBody = parse_body(&body)?;
    let preferences = state.service.save_preferences(
        &auth.wallet_id,
        &auth.copayer_id,
        req.email,
        req.language,
        req.unit,
    )?;
    Ok(Json(preferences))
}

// --- addresses -------------------------------------------------------------

pub async fn create_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<Address>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: CreateAddressBody = parse_body(&body)?;
    let address = state
        .service
        .create_address(&auth.wallet_id, req.ignore_max_gap)
        .await?;
    Ok(Json(address))
}

pub async fn get_addresses(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<AddressesQuery>,
) -> Result<Json<Vec<Address>>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let addresses = state
        .service
        .get_main_addresses(&auth.wallet_id, query.limit, query.reverse)?;
    Ok(Json(addresses))
}

pub async fn scan_addresses(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: ScanBody = parse_body(&body)?;
    let result = state
        .service
        .scan_addresses(&auth.wallet_id, req.starting_step.unwrap_or(1))
        .await?;
    Ok(Json(serde_json::json!({
        "foundMain": result.found_main,
        "foundChange": result.found_change,
    })))
}

// --- ledger reads ----------------------------------------------------------

pub async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let balance = state
        .service
        .get_balance(
            &auth.wallet_id,
            query.address_list().as_deref(),
            query.asset.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(balance).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

pub async fn get_utxos(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let utxos = state
        .service
        .get_utxos(
            &auth.wallet_id,
            query.address_list().as_deref(),
            query.asset.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(utxos).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

pub async fn get_tx_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let history = state
        .service
        .get_tx_history(
            &auth.wallet_id,
            query.address_list().as_deref(),
            HistoryOptions {
                asset: query.asset.clone(),
                limit: query.limit,
                last_row_id: query.last_row_id,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(history).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

pub async fn get_raw_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(txid): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let _auth = authenticate(&state, &headers, "get", &uri, "")?;
    let record = state.service.get_raw_tx(&txid).await?;
    Ok(Json(serde_json::to_value(record).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

pub async fn broadcast_raw(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let _auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let joint: Joint = parse_body(&body)?;
    let unit = state.service.broadcast_raw_joint(&joint).await?;
    Ok(Json(serde_json::json!({ "unit": unit })))
}

// --- proposals -------------------------------------------------------------

pub async fn create_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: CreateTxBody = parse_body(&body)?;
    let proposal = state
        .service
        .create_tx(
            &auth.copayer_id,
            &auth.wallet_id,
            CreateTxRequest {
                tx_proposal_id: req.tx_proposal_id,
                app: req.app,
                params: req.params,
                outputs: req.outputs,
                dry_run: req.dry_run,
            },
        )
        .await?;
    Ok(Json(proposal))
}

pub async fn publish_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
    body: String,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: PublishTxBody = parse_body(&body)?;
    let proposal = state
        .service
        .publish_tx(&auth.copayer_id, &auth.wallet_id, &proposal_id, &req.proposal_signature)
        .await?;
    Ok(Json(proposal))
}

pub async fn sign_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
    body: String,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: SignaturesBody = parse_body(&body)?;
    let proposal = state
        .service
        .sign_tx(&auth.copayer_id, &auth.wallet_id, &proposal_id, req.signatures)
        .await?;
    Ok(Json(proposal))
}

pub async fn reject_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
    body: String,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: RejectTxBody = parse_body(&body)?;
    let proposal = state
        .service
        .reject_tx(&auth.copayer_id, &auth.wallet_id, &proposal_id, req.reason)
        .await?;
    Ok(Json(proposal))
}

pub async fn broadcast_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
    body: String,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let proposal = state
        .service
        .broadcast_tx(&auth.copayer_id, &auth.wallet_id, &proposal_id)
        .await?;
    Ok(Json(proposal))
}

pub async fn remove_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "delete", &uri, "")?;
    state
        .service
        .remove_tx(&auth.copayer_id, &auth.wallet_id, &proposal_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn get_tx(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(proposal_id): Path<String>,
) -> Result<Json<TxProposal>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    Ok(Json(state.service.get_tx(&auth.wallet_id, &proposal_id)?))
}

pub async fn list_txs(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<TxListQuery>,
) -> Result<Json<Vec<TxProposal>>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(vec![parse_status(s)?]),
    };
    let filter = TxFilter {
        status,
        app: query.app,
        min_ts: query.min_ts.and_then(timestamp),
        max_ts: query.max_ts.and_then(timestamp),
        limit: query.limit,
        is_pending: query.is_pending,
    };
    Ok(Json(state.service.get_txs(&auth.wallet_id, &filter)?))
}

pub async fn pending_txs(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Result<Json<Vec<TxProposal>>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    Ok(Json(state.service.get_pending_txs(&auth.wallet_id)?))
}

fn parse_status(s: &str) -> Result<ProposalStatus, ServiceError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| ServiceError::BadRequest(format!("unknown proposal status {}", s)))
}

// --- notes -----------------------------------------------------------------

pub async fn get_tx_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(txid): Path<String>,
) -> Result<Json<TxNote>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    Ok(Json(state.service.get_tx_note(&auth.wallet_id, &txid)?))
}

pub async fn edit_tx_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(txid): Path<String>,
    body: String,
) -> Result<Json<TxNote>, ServiceError> {
    let auth = authenticate(&state, &headers, "put", &uri, &body)?;
    let req: NoteBody = parse_body(&body)?;
    let note = state
        .service
        .edit_tx_note(&auth.wallet_id, &auth.copayer_id, &txid, req.body)
        .await?;
    Ok(Json(note))
}

pub async fn list_tx_notes(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<NotesQuery>,
) -> Result<Json<Vec<TxNote>>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let notes = state
        .service
        .get_tx_notes_since(&auth.wallet_id, query.min_ts.and_then(timestamp));
    Ok(Json(notes))
}

// --- notifications ---------------------------------------------------------

pub async fn get_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Vec<Notification>>, ServiceError> {
    let auth = authenticate(&state, &headers, "get", &uri, "")?;
    let notifications =
        state
            .service
            .get_notifications(&auth.wallet_id, query.time_span, query.notification_id)?;
    Ok(Json(notifications))
}

// --- subscriptions ---------------------------------------------------------

pub async fn subscribe_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: PushSubBody = parse_body(&body)?;
    state.service.subscribe_push(&auth.copayer_id, req.token, req.platform);
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn unsubscribe_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "delete", &uri, "")?;
    state.service.unsubscribe_push(&auth.copayer_id, &token);
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn subscribe_tx_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let req: TxConfirmationBody = parse_body(&body)?;
    state
        .service
        .subscribe_tx_confirmation(&auth.wallet_id, &auth.copayer_id, req.txid)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn unsubscribe_tx_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    Path(txid): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "delete", &uri, "")?;
    state.service.unsubscribe_tx_confirmation(&auth.copayer_id, &txid);
    Ok(Json(serde_json::json!({ "success": true })))
}

// --- assets and fiat rates -------------------------------------------------

pub async fn get_assets(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "assets": state.service.get_assets() }))
}

pub async fn get_asset(
    State(state): State<AppState>,
    Path(asset): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let asset = state.service.get_asset(&asset)?;
    Ok(Json(serde_json::to_value(asset).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

pub async fn get_fiat_rate(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<FiatRateQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let rate = state.service.get_fiat_rate(
        &code,
        query.provider.as_deref(),
        query.ts.and_then(timestamp),
    )?;
    Ok(Json(serde_json::to_value(rate).map_err(|e| ServiceError::Internal(e.to_string()))?))
}

// --- sessions --------------------------------------------------------------

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<LoginResponse>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    let session = state.service.login(&auth.copayer_id)?;
    Ok(Json(LoginResponse { session }))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let auth = authenticate(&state, &headers, "post", &uri, &body)?;
    state.service.logout(&auth.copayer_id);
    Ok(Json(serde_json::json!({ "success": true })))
}
