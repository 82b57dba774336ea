//! Per-wallet mutual exclusion
//!
//! Every state-mutating wallet operation runs through [`WalletLocks::run_locked`]:
//! acquisition is bounded by a wait budget and the held section by a
//! max-hold budget, so a crashed or wedged worker cannot pin a wallet
//! forever. Within one wallet all mutations are totally ordered by lock
//! acquisition; across wallets no ordering is promised.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy)]
pub struct LockOpts {
    pub wait: Duration,
    pub max_hold: Duration,
}

pub struct WalletLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    defaults: LockOpts,
}

impl WalletLocks {
    pub fn new(defaults: LockOpts) -> Self {
        Self { locks: Mutex::new(HashMap::new()), defaults }
    }

    pub fn defaults(&self) -> LockOpts {
        self.defaults
    }

    fn lock_for(&self, wallet_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        locks
            .entry(wallet_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run `op` while holding the wallet's lock.
    ///
    /// Fails with `LockTimeout` when the lock cannot be acquired within
    /// `opts.wait`, and with `LockHoldExpired` when `op` outlives
    /// `opts.max_hold`; in the latter case the operation future is dropped
    /// and the lock released.
    pub async fn run_locked<T, F, Fut>(
        &self,
        wallet_id: &str,
        opts: LockOpts,
        op: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let lock = self.lock_for(wallet_id);
        let guard = tokio::time::timeout(opts.wait, lock.lock())
            .await
            .map_err(|_| ServiceError::LockTimeout)?;

        let result = tokio::time::timeout(opts.max_hold, op())
            .await
            .map_err(|_| ServiceError::LockHoldExpired)?;

        drop(guard);
        result
    }

    /// Run with the configured default budgets.
    pub async fn run_locked_default<T, F, Fut>(
        &self,
        wallet_id: &str,
        op: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.run_locked(wallet_id, self.defaults, op).await
    }
}
