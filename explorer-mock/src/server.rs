/// Axum HTTP server setup and routing
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::*;
use crate::state::LedgerState;

pub fn create_router(state: Arc<LedgerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Explorer API
        .route("/utxos", get(get_utxos))
        .route("/balance", get(get_balance))
        .route("/txhistory", get(get_tx_history))
        .route("/address/:address/activity", get(get_address_activity))
        .route("/tx/:unit", get(get_transaction))
        .route("/asset_metadata", get(get_asset_metadata))
        // Hub API
        .route("/broadcast", post(broadcast))
        // Test helpers
        .route("/seed/utxo", post(seed_utxo))
        .route("/seed/activity", post(seed_activity))
        .route("/control/stabilize", post(stabilize))
        .route("/control/fail_broadcast", post(fail_broadcast))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(state: Arc<LedgerState>, host: String, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("explorer mock listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
