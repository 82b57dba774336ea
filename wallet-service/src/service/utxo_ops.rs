//! UTXO reservation
//!
//! There is no persistent lock table: the view is recomputed from the
//! explorer on every publish. Inputs referenced by pending proposals are
//! `locked`; inputs referenced by recent broadcasts are `spent` even while
//! the explorer still reports them, which tolerates explorer lag without
//! ever double-spending.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::ServiceError;
use crate::ledger::types::UtxoRecord;
use crate::model::{UtxoRef, Wallet};

use super::WalletService;

#[derive(Debug, Clone, Serialize)]
pub struct UtxoView {
    #[serde(flatten)]
    pub record: UtxoRecord,
    /// Referenced by a pending proposal.
    pub locked: bool,
}

impl WalletService {
    /// The reservation view over the wallet's live UTXOs: explorer truth
    /// minus recently broadcast inputs, with pending-proposal inputs
    /// flagged `locked`.
    pub async fn get_utxo_view(
        &self,
        wallet: &Wallet,
        filter_addresses: Option<&[String]>,
        asset: Option<&str>,
    ) -> Result<Vec<UtxoView>, ServiceError> {
        let addresses: Vec<String> = match filter_addresses {
            Some(filter) => filter.to_vec(),
            None => self
                .storage
                .fetch_addresses(&wallet.id)
                .into_iter()
                .map(|a| a.address)
                .collect(),
        };
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let utxos = self.explorer.get_utxos(&addresses, asset).await?;

        let locked: HashSet<UtxoRef> = self
            .storage
            .fetch_pending_txs(&wallet.id)
            .into_iter()
            .flat_map(|tx| tx.inputs)
            .collect();

        let spent: HashSet<UtxoRef> = self
            .storage
            .fetch_recent_broadcasts(
                &wallet.id,
                self.config.broadcast_log_window,
                self.config.broadcast_log_cap,
            )
            .into_iter()
            .flat_map(|entry| entry.inputs)
            .collect();

        Ok(utxos
            .into_iter()
            .filter_map(|record| {
                let key = UtxoRef {
                    unit: record.unit.clone(),
                    message_index: record.message_index,
                    output_index: record.output_index,
                };
                if spent.contains(&key) {
                    return None;
                }
                Some(UtxoView { locked: locked.contains(&key), record })
            })
            .collect())
    }

    pub async fn get_utxos(
        &self,
        wallet_id: &str,
        filter_addresses: Option<&[String]>,
        asset: Option<&str>,
    ) -> Result<Vec<UtxoView>, ServiceError> {
        let wallet = self.storage.fetch_wallet(wallet_id)?;
        self.get_utxo_view(&wallet, filter_addresses, asset).await
    }

    /// Check that every input of a proposal is still free in the view.
    /// `exclude_proposal` discounts locks held by the proposal itself, so a
    /// republish of the same draft does not collide with its own inputs.
    pub async fn check_utxos_available(
        &self,
        wallet: &Wallet,
        inputs: &[UtxoRef],
        exclude_proposal: &str,
    ) -> Result<(), ServiceError> {
        let own: HashSet<&UtxoRef> = inputs.iter().collect();

        let locked: HashSet<UtxoRef> = self
            .storage
            .fetch_pending_txs(&wallet.id)
            .into_iter()
            .filter(|tx| tx.id != exclude_proposal)
            .flat_map(|tx| tx.inputs)
            .collect();

        let spent: HashSet<UtxoRef> = self
            .storage
            .fetch_recent_broadcasts(
                &wallet.id,
                self.config.broadcast_log_window,
                self.config.broadcast_log_cap,
            )
            .into_iter()
            .flat_map(|entry| entry.inputs)
            .collect();

        for input in own {
            if locked.contains(input) || spent.contains(input) {
                return Err(ServiceError::UnavailableUtxos);
            }
        }

        // The explorer must still report every input as unspent.
        let addresses: Vec<String> = self
            .storage
            .fetch_addresses(&wallet.id)
            .into_iter()
            .map(|a| a.address)
            .collect();
        let live = self.explorer.get_utxos(&addresses, None).await?;
        let live_keys: HashSet<UtxoRef> = live
            .into_iter()
            .map(|u| UtxoRef {
                unit: u.unit,
                message_index: u.message_index,
                output_index: u.output_index,
            })
            .collect();
        for input in inputs {
            if !live_keys.contains(input) {
                return Err(ServiceError::UnavailableUtxos);
            }
        }
        Ok(())
    }
}
