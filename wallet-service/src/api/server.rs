use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::WalletService;

use super::handlers::{self, AppState};
use super::limiter::RateLimiter;

pub fn create_router(service: Arc<WalletService>) -> Router {
    let limiter = Arc::new(RateLimiter::new(
        service.config.create_wallet_rate_limit,
        service.config.create_wallet_slow_down_after,
    ));
    let state = AppState { service, limiter };

    Router::new()
        // Wallets and copayers
        .route("/wallets", post(handlers::create_wallet).get(handlers::get_wallet_status).put(handlers::update_wallet))
        .route("/wallets/:id/copayers", post(handlers::join_wallet))
        .route("/wallets/:id", get(handlers::get_wallet_from_identifier))
        .route("/copayers", get(handlers::get_copayers))
        .route("/copayers/:id", put(handlers::add_access))
        // Preferences
        .route("/preferences", get(handlers::get_preferences).put(handlers::save_preferences))
        // Addresses
        .route("/addresses", post(handlers::create_address).get(handlers::get_addresses))
        .route("/addresses/scan", post(handlers::scan_addresses))
        // Ledger reads
        .route("/balance", get(handlers::get_balance))
        .route("/utxos", get(handlers::get_utxos))
        .route("/txhistory", get(handlers::get_tx_history))
        .route("/txraw/:txid", get(handlers::get_raw_tx))
        .route("/broadcast_raw", post(handlers::broadcast_raw))
        // Proposals
        .route("/txproposals", post(handlers::create_tx).get(handlers::list_txs))
        .route("/txproposals/pending", get(handlers::pending_txs))
        .route("/txproposals/:id", get(handlers::get_tx).delete(handlers::remove_tx))
        .route("/txproposals/:id/publish", post(handlers::publish_tx))
        .route("/txproposals/:id/signatures", post(handlers::sign_tx))
        .route("/txproposals/:id/rejections", post(handlers::reject_tx))
        .route("/txproposals/:id/broadcast", post(handlers::broadcast_tx))
        // Notes
        .route("/txnotes", get(handlers::list_tx_notes))
        .route("/txnotes/:txid", get(handlers::get_tx_note).put(handlers::edit_tx_note))
        // Notifications and subscriptions
        .route("/notifications", get(handlers::get_notifications))
        .route("/pushnotifications/subscriptions", post(handlers::subscribe_push))
        .route("/pushnotifications/subscriptions/:token", delete(handlers::unsubscribe_push))
        .route("/txconfirmations", post(handlers::subscribe_tx_confirmation))
        .route("/txconfirmations/:txid", delete(handlers::unsubscribe_tx_confirmation))
        // Assets and rates
        .route("/assets", get(handlers::get_assets))
        .route("/assets/:asset", get(handlers::get_asset))
        .route("/fiatrates/:code", get(handlers::get_fiat_rate))
        // Sessions
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(service: Arc<WalletService>, addr: &str) -> anyhow::Result<()> {
    let app = create_router(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("wallet service listening on http://{}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
