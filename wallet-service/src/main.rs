use std::sync::Arc;

use tokio::sync::mpsc;

use wallet_service::api::server;
use wallet_service::config::Config;
use wallet_service::ledger::{HttpExplorer, HttpHub};
use wallet_service::monitor::BlockchainMonitor;
use wallet_service::service::WalletService;
use wallet_service::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    let explorer = Arc::new(HttpExplorer::new(
        config.explorer_url.clone(),
        config.request_timeout,
    ));
    let hub = Arc::new(HttpHub::new(config.hub_url.clone(), config.request_timeout));

    let bind_addr = config.bind_addr.clone();
    let service = WalletService::new(config, Storage::new(), explorer, hub);

    // The monitor pipeline consumes ledger events pushed by the node
    // bridge; the channel stays open for the process lifetime.
    let (_event_tx, event_rx) = mpsc::channel(256);
    let monitor = BlockchainMonitor::new(service.clone());
    tokio::spawn(monitor.run(event_rx));

    log::info!("starting wallet coordination service on {}", bind_addr);
    server::start_server(service, &bind_addr).await?;
    Ok(())
}
