//! Blockchain monitor
//!
//! Ingests ledger events (`new_joint`, stability transitions) and
//! reconciles them against proposal state: accepted proposals whose unit
//! appears on the DAG become `broadcasted`, stabilised units flip the
//! stable flag and fire single-shot confirmation subscriptions, and
//! incoming outputs raise `NewIncomingTx`. Notification delivery is
//! best-effort and never blocks the pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use crate::error::ServiceError;
use crate::ledger::types::{Joint, LedgerEvent};
use crate::model::notification::kinds;
use crate::model::{Asset, ProposalStatus};
use crate::service::WalletService;

/// Dedupe window for outgoing/incoming notifications.
const DEDUPE_WINDOW_HOURS: i64 = 24;

pub struct BlockchainMonitor {
    service: Arc<WalletService>,
    /// Addresses known to belong to some wallet; grown from broker
    /// announcements so new-joint handling skips storage lookups for
    /// foreign addresses.
    watched: Mutex<HashSet<String>>,
}

impl BlockchainMonitor {
    pub fn new(service: Arc<WalletService>) -> Arc<Self> {
        let mut watched = HashSet::new();
        for wallet_id in service.storage.fetch_all_wallet_ids() {
            for address in service.storage.fetch_addresses(&wallet_id) {
                watched.insert(address.address);
            }
        }
        Arc::new(Self { service, watched: Mutex::new(watched) })
    }

    /// Run the pipeline until the event channel closes. Also follows the
    /// broker's address announcements to keep the watch set current.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<LedgerEvent>) {
        let mut new_addresses = self.service.broker.on_new_address();
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_event(event).await {
                        log::warn!("monitor event handling failed: {}", e);
                    }
                }
                address = new_addresses.recv() => {
                    if let Ok(address) = address {
                        self.watched.lock().expect("watch set poisoned").insert(address);
                    }
                }
            }
        }
        log::info!("monitor event channel closed, stopping");
    }

    pub async fn handle_event(&self, event: LedgerEvent) -> Result<(), ServiceError> {
        match event {
            LedgerEvent::NewJoint(joint) => self.handle_new_joint(&joint).await,
            LedgerEvent::TransactionsBecameStable { units } => {
                self.handle_stable_units(&units).await
            }
            LedgerEvent::MciBecameStable { mci, units } => {
                log::debug!("mci {} stabilized {} units", mci, units.len());
                self.handle_stable_units(&units).await
            }
        }
    }

    async fn handle_new_joint(&self, joint: &Joint) -> Result<(), ServiceError> {
        let Some(unit_hash) = joint.unit.unit.clone() else {
            return Ok(());
        };

        self.reconcile_outgoing(&unit_hash).await?;
        self.notify_incoming(joint, &unit_hash).await?;
        Ok(())
    }

    /// An accepted proposal whose txid appears on the DAG was broadcast,
    /// by us on an earlier attempt or by a third party.
    async fn reconcile_outgoing(&self, unit_hash: &str) -> Result<(), ServiceError> {
        let Some(tx) = self.service.storage.fetch_tx_by_hash(unit_hash) else {
            return Ok(());
        };
        if tx.status != ProposalStatus::Accepted {
            return Ok(());
        }

        let wallet_id = tx.wallet_id.clone();
        let service = &self.service;
        service
            .locks
            .run_locked_default(&wallet_id, || async {
                let Some(mut tx) = service.storage.fetch_tx(&wallet_id, &tx.id) else {
                    return Ok(());
                };
                if tx.status != ProposalStatus::Accepted {
                    return Ok(());
                }
                tx.status = ProposalStatus::Broadcasted;
                tx.broadcasted_on = Some(Utc::now());
                service.storage.store_tx(&tx);

                if !self.has_recent_outgoing_notification(&wallet_id, unit_hash) {
                    service.notify(
                        &wallet_id,
                        kinds::NEW_OUTGOING_TX_BY_THIRD_PARTY,
                        None,
                        serde_json::json!({ "txid": unit_hash }),
                    );
                }
                Ok(())
            })
            .await
    }

    fn has_recent_outgoing_notification(&self, wallet_id: &str, txid: &str) -> bool {
        let since = Utc::now() - Duration::hours(DEDUPE_WINDOW_HOURS);
        self.service
            .storage
            .fetch_notifications_since(wallet_id, since)
            .iter()
            .any(|n| {
                (n.kind == kinds::NEW_OUTGOING_TX || n.kind == kinds::NEW_OUTGOING_TX_BY_THIRD_PARTY)
                    && n.data.get("txid").and_then(|t| t.as_str()) == Some(txid)
            })
    }

    /// Raise `NewIncomingTx` for outputs paying watched addresses that are
    /// neither unit authors nor internal change, and mark activity on every
    /// involved address.
    async fn notify_incoming(&self, joint: &Joint, unit_hash: &str) -> Result<(), ServiceError> {
        let authors: HashSet<&str> =
            joint.unit.authors.iter().map(|a| a.address.as_str()).collect();

        // Authors that are wallet addresses become active too.
        for author in &authors {
            if let Some(wallet_id) = self.service.storage.fetch_wallet_id_for_address(author) {
                self.service.storage.mark_address_activity(&wallet_id, author);
            }
        }

        for message in &joint.unit.messages {
            if message.app != "payment" {
                continue;
            }
            let Some(outputs) = message
                .payload
                .as_ref()
                .and_then(|p| p.get("outputs"))
                .and_then(|o| o.as_array())
            else {
                continue;
            };

            for output in outputs {
                let Some(address) = output.get("address").and_then(|a| a.as_str()) else {
                    continue;
                };
                let amount = output.get("amount").and_then(|a| a.as_u64()).unwrap_or(0);

                if authors.contains(address) {
                    continue;
                }
                if !self.watched.lock().expect("watch set poisoned").contains(address) {
                    // Not one of ours unless storage says otherwise (the
                    // watch set can lag a restart).
                    if self.service.storage.fetch_wallet_id_for_address(address).is_none() {
                        continue;
                    }
                }
                let Some(wallet_id) = self.service.storage.fetch_wallet_id_for_address(address)
                else {
                    continue;
                };
                let Some(record) = self.service.storage.fetch_address(&wallet_id, address) else {
                    continue;
                };
                self.service.storage.mark_address_activity(&wallet_id, address);
                if record.is_change {
                    continue;
                }
                if self.has_recent_incoming_notification(&wallet_id, unit_hash, address, amount) {
                    continue;
                }
                self.service.notify(
                    &wallet_id,
                    kinds::NEW_INCOMING_TX,
                    None,
                    serde_json::json!({
                        "txid": unit_hash,
                        "address": address,
                        "amount": amount,
                    }),
                );
            }
        }
        Ok(())
    }

    fn has_recent_incoming_notification(
        &self,
        wallet_id: &str,
        txid: &str,
        address: &str,
        amount: u64,
    ) -> bool {
        let since = Utc::now() - Duration::hours(DEDUPE_WINDOW_HOURS);
        self.service
            .storage
            .fetch_notifications_since(wallet_id, since)
            .iter()
            .any(|n| {
                n.kind == kinds::NEW_INCOMING_TX
                    && n.data.get("txid").and_then(|t| t.as_str()) == Some(txid)
                    && n.data.get("address").and_then(|a| a.as_str()) == Some(address)
                    && n.data.get("amount").and_then(|a| a.as_u64()) == Some(amount)
            })
    }

    /// Stability: flip broadcast proposals to stable and fire confirmation
    /// subscriptions, keyed by the stabilised unit hash. Each subscription
    /// fires once; deactivation is atomic with the notification.
    async fn handle_stable_units(&self, units: &[String]) -> Result<(), ServiceError> {
        for unit in units {
            if let Some(tx) = self.service.storage.fetch_tx_by_hash(unit) {
                if tx.status == ProposalStatus::Broadcasted && !tx.is_stable {
                    let wallet_id = tx.wallet_id.clone();
                    let service = &self.service;
                    service
                        .locks
                        .run_locked_default(&wallet_id, || async {
                            if let Some(mut tx) = service.storage.fetch_tx(&wallet_id, &tx.id) {
                                if !tx.is_stable {
                                    tx.is_stable = true;
                                    tx.stabilized_on = Some(Utc::now());
                                    service.storage.store_tx(&tx);
                                }
                            }
                            Ok(())
                        })
                        .await?;
                }
            }

            for sub in self.service.storage.deactivate_tx_confirmation_subs(unit) {
                // The confirmation carries the subscribed wallet's coin and
                // network, looked up at fire time.
                let (coin, network) = match self.service.storage.fetch_wallet(&sub.wallet_id) {
                    Ok(wallet) => (wallet.coin, format!("{:?}", wallet.network).to_lowercase()),
                    Err(_) => continue,
                };
                self.service.notify(
                    &sub.wallet_id,
                    kinds::TX_CONFIRMATION,
                    Some(&sub.copayer_id),
                    serde_json::json!({
                        "txid": sub.txid,
                        "coin": coin,
                        "network": network,
                    }),
                );
            }
        }
        Ok(())
    }

    /// One-off scan of asset-metadata units published by the trusted
    /// registries. Conflicting tickers are tagged with a registry suffix
    /// instead of clobbering the earlier claim.
    pub async fn sync_asset_metadata(&self, registries: &[String]) -> Result<usize, ServiceError> {
        let records = self.service.explorer.get_asset_metadata(registries).await?;
        let mut upserted = 0;
        for record in records {
            let ticker = if self.service.storage.fetch_asset(&record.asset).is_none()
                && self.service.storage.asset_ticker_taken(&record.ticker)
            {
                let tag: String = record.registry_address.chars().take(6).collect();
                format!("{}@{}", record.ticker, tag)
            } else {
                record.ticker.clone()
            };
            self.service.storage.upsert_asset(&Asset {
                asset: record.asset,
                ticker,
                name: record.name,
                decimals: record.decimals,
                registry_address: record.registry_address,
                created_on: Utc::now(),
            });
            upserted += 1;
        }
        log::info!("asset metadata sync upserted {} records", upserted);
        Ok(upserted)
    }
}
