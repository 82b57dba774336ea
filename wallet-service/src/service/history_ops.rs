//! Read-side ledger queries: balance (cached), history, raw units.
//!
//! These run without the wallet lock and may observe mid-transition states;
//! callers must not assume, e.g., that an accepted proposal has been
//! broadcast.

use std::collections::BTreeMap;

use crate::error::ServiceError;
use crate::ledger::types::{BalanceEntry, HistoryItem, HistoryOptions, Joint, TxRecord};

use super::WalletService;

impl WalletService {
    /// Balance per asset over the wallet's (optionally filtered) addresses,
    /// cached for `balance_cache_duration`.
    pub async fn get_balance(
        &self,
        wallet_id: &str,
        filter_addresses: Option<&[String]>,
        asset: Option<&str>,
    ) -> Result<BTreeMap<String, BalanceEntry>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;

        let addresses: Vec<String> = match filter_addresses {
            Some(filter) => filter.to_vec(),
            None => self
                .storage
                .fetch_addresses(wallet_id)
                .into_iter()
                .map(|a| a.address)
                .collect(),
        };
        if addresses.is_empty() {
            return Ok(BTreeMap::new());
        }

        let cache_key = format!("{}|{}|{}", wallet_id, addresses.join(","), asset.unwrap_or("base"));
        if let Some(cached) = self.cached_balance(&cache_key) {
            return Ok(cached);
        }

        let balance = self.explorer.get_balance(&addresses, asset).await?;
        self.cache_balance(&cache_key, &balance);
        Ok(balance)
    }

    pub async fn get_tx_history(
        &self,
        wallet_id: &str,
        filter_addresses: Option<&[String]>,
        opts: HistoryOptions,
    ) -> Result<Vec<HistoryItem>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        if let Some(limit) = opts.limit {
            if limit > self.config.history_limit {
                return Err(ServiceError::HistoryLimitExceeded);
            }
        }

        let addresses: Vec<String> = match filter_addresses {
            Some(filter) => filter.to_vec(),
            None => self
                .storage
                .fetch_addresses(wallet_id)
                .into_iter()
                .map(|a| a.address)
                .collect(),
        };
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        self.explorer.get_tx_history(&addresses, &opts).await
    }

    /// Read a raw unit back from the explorer.
    pub async fn get_raw_tx(&self, txid: &str) -> Result<TxRecord, ServiceError> {
        self.explorer
            .get_transaction(txid)
            .await?
            .ok_or(ServiceError::TxNotFound)
    }

    /// Pass-through joint submission for externally composed units.
    pub async fn broadcast_raw_joint(&self, joint: &Joint) -> Result<String, ServiceError> {
        self.hub.broadcast_joint(joint).await
    }
}
