//! Wallet service orchestration
//!
//! [`WalletService`] owns the shared infrastructure (config, storage, locks,
//! broker, ledger clients) and delegates each operation to the specialized
//! ops modules.

pub mod address_ops;
pub mod history_ops;
pub mod misc_ops;
pub mod proposal_ops;
pub mod utxo_ops;
pub mod wallet_ops;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::broker::MessageBroker;
use crate::config::Config;
use crate::error::ServiceError;
use crate::ledger::types::BalanceEntry;
use crate::ledger::{Explorer, Hub};
use crate::lock::{LockOpts, WalletLocks};
use crate::model::Notification;
use crate::storage::Storage;

type BalanceMap = std::collections::BTreeMap<String, BalanceEntry>;

pub struct WalletService {
    pub config: Config,
    pub storage: Storage,
    pub locks: WalletLocks,
    pub broker: MessageBroker,
    pub explorer: Arc<dyn Explorer>,
    pub hub: Arc<dyn Hub>,
    balance_cache: Mutex<HashMap<String, (Instant, BalanceMap)>>,
}

impl WalletService {
    pub fn new(
        config: Config,
        storage: Storage,
        explorer: Arc<dyn Explorer>,
        hub: Arc<dyn Hub>,
    ) -> Arc<Self> {
        let locks = WalletLocks::new(LockOpts {
            wait: config.lock_wait_time,
            max_hold: config.lock_exe_time,
        });
        Arc::new(Self {
            config,
            storage,
            locks,
            broker: MessageBroker::new(),
            explorer,
            hub,
            balance_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Store a notification and fan it out through the broker. Delivery is
    /// best-effort; the stored record is the source of truth.
    pub(crate) fn notify(
        &self,
        wallet_id: &str,
        kind: &str,
        creator_id: Option<&str>,
        data: serde_json::Value,
    ) -> Notification {
        let notification = self
            .storage
            .store_notification(wallet_id, kind, creator_id, data);
        self.broker.send(notification.clone());
        notification
    }

    pub(crate) fn cached_balance(&self, key: &str) -> Option<BalanceMap> {
        let cache = self.balance_cache.lock().expect("balance cache poisoned");
        cache.get(key).and_then(|(at, balance)| {
            (at.elapsed() < self.config.balance_cache_duration).then(|| balance.clone())
        })
    }

    pub(crate) fn cache_balance(&self, key: &str, balance: &BalanceMap) {
        let mut cache = self.balance_cache.lock().expect("balance cache poisoned");
        cache.insert(key.to_string(), (Instant::now(), balance.clone()));
    }

    /// Lock options for long server-side work (scan), 1.5x the normal hold.
    pub(crate) fn server_lock_opts(&self) -> LockOpts {
        LockOpts {
            wait: self.config.lock_wait_time,
            max_hold: self.config.server_exe_time(),
        }
    }
}

pub use proposal_ops::CreateTxRequest;
pub use wallet_ops::{CreateWalletRequest, JoinWalletRequest};

impl WalletService {
    pub fn check_client_version(&self, version: Option<&str>) -> Result<(), ServiceError> {
        let Some(version) = version else { return Ok(()) };
        let Some(given) = parse_client_version(version) else {
            // Unknown agents are let through; only an explicit owc client
            // below the floor is refused.
            return Ok(());
        };
        let floor = parse_client_version(&self.config.min_client_version)
            .ok_or_else(|| ServiceError::Internal("bad min_client_version config".into()))?;
        if given < floor {
            return Err(ServiceError::UpgradeNeeded);
        }
        Ok(())
    }
}

fn parse_client_version(version: &str) -> Option<(u32, u32, u32)> {
    let rest = version.strip_prefix("owc-")?;
    let mut parts = rest.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::parse_client_version;

    #[test]
    fn client_versions_parse_and_order() {
        assert_eq!(parse_client_version("owc-1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_client_version("owc-1.2"), Some((1, 2, 0)));
        assert_eq!(parse_client_version("other-1.2.3"), None);
        assert!(parse_client_version("owc-0.9.9") < parse_client_version("owc-1.0.0"));
    }
}
