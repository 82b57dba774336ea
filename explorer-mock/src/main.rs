use std::sync::Arc;

use explorer_mock::server;
use explorer_mock::state::LedgerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4000);

    let state = Arc::new(LedgerState::new());
    server::run_server(state, host, port).await
}
