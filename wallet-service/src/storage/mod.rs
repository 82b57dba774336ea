//! Storage layer
//!
//! One collection per persisted entity, held in memory
//! behind a single mutex with document-level atomicity. Every collection
//! except the copayer-lookup index and the asset table is only mutated
//! under the owning wallet's lock; the lookup index and assets rely on the
//! mutex alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::ServiceError;
use crate::model::{
    Address, Asset, BroadcastLogEntry, CopayerLookup, FiatRate, Notification, Preferences,
    ProposalStatus, PushSub, Session, TxApp, TxConfirmationSub, TxNote, TxProposal, Wallet,
};

#[derive(Default)]
struct Collections {
    wallets: HashMap<String, Wallet>,
    copayer_lookups: HashMap<String, CopayerLookup>,
    /// Addresses per wallet, in creation order.
    addresses: HashMap<String, Vec<Address>>,
    /// Reverse index: address string to owning wallet.
    address_owner: HashMap<String, String>,
    /// Proposals per wallet, in creation order.
    proposals: HashMap<String, Vec<TxProposal>>,
    /// txid to (wallet, proposal id), maintained once a txid is known.
    txid_index: HashMap<String, (String, String)>,
    notifications: HashMap<String, Vec<Notification>>,
    notification_seq: HashMap<String, u64>,
    sessions: HashMap<String, Session>,
    preferences: HashMap<(String, String), Preferences>,
    tx_notes: HashMap<(String, String), TxNote>,
    tx_confirmation_subs: Vec<TxConfirmationSub>,
    push_subs: Vec<PushSub>,
    assets: BTreeMap<String, Asset>,
    fiat_rates: Vec<FiatRate>,
    broadcast_log: Vec<BroadcastLogEntry>,
}

/// Filters for proposal listing.
#[derive(Debug, Default, Clone)]
pub struct TxFilter {
    pub status: Option<Vec<ProposalStatus>>,
    pub app: Option<TxApp>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub is_pending: Option<bool>,
}

#[derive(Clone)]
pub struct Storage {
    inner: Arc<Mutex<Collections>>,
    ticker: Arc<AtomicU64>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Collections::default())),
            ticker: Arc::new(AtomicU64::new(0)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> T {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");
        f(&mut inner)
    }

    // --- wallets ---------------------------------------------------------

    pub fn wallet_exists(&self, wallet_id: &str) -> bool {
        self.with(|c| c.wallets.contains_key(wallet_id))
    }

    pub fn store_wallet(&self, wallet: &Wallet) {
        self.with(|c| {
            c.wallets.insert(wallet.id.clone(), wallet.clone());
        })
    }

    pub fn fetch_wallet(&self, wallet_id: &str) -> Result<Wallet, ServiceError> {
        self.with(|c| c.wallets.get(wallet_id).cloned())
            .ok_or(ServiceError::WalletNotFound)
    }

    pub fn fetch_all_wallet_ids(&self) -> Vec<String> {
        self.with(|c| c.wallets.keys().cloned().collect())
    }

    // --- copayer lookup index -------------------------------------------

    pub fn store_copayer_lookup(&self, lookup: &CopayerLookup) {
        self.with(|c| {
            c.copayer_lookups
                .insert(lookup.copayer_id.clone(), lookup.clone());
        })
    }

    pub fn fetch_copayer_lookup(&self, copayer_id: &str) -> Option<CopayerLookup> {
        self.with(|c| c.copayer_lookups.get(copayer_id).cloned())
    }

    // --- addresses -------------------------------------------------------

    pub fn store_address(&self, address: &Address) {
        self.with(|c| {
            c.address_owner
                .insert(address.address.clone(), address.wallet_id.clone());
            let list = c.addresses.entry(address.wallet_id.clone()).or_default();
            match list.iter_mut().find(|a| a.address == address.address) {
                Some(existing) => *existing = address.clone(),
                None => list.push(address.clone()),
            }
        })
    }

    pub fn fetch_addresses(&self, wallet_id: &str) -> Vec<Address> {
        self.with(|c| c.addresses.get(wallet_id).cloned().unwrap_or_default())
    }

    pub fn fetch_address(&self, wallet_id: &str, address: &str) -> Option<Address> {
        self.with(|c| {
            c.addresses
                .get(wallet_id)
                .and_then(|list| list.iter().find(|a| a.address == address).cloned())
        })
    }

    pub fn fetch_wallet_id_for_address(&self, address: &str) -> Option<String> {
        self.with(|c| c.address_owner.get(address).cloned())
    }

    /// Flip the sticky activity flag; returns whether the address was found.
    pub fn mark_address_activity(&self, wallet_id: &str, address: &str) -> bool {
        self.with(|c| {
            if let Some(list) = c.addresses.get_mut(wallet_id) {
                if let Some(a) = list.iter_mut().find(|a| a.address == address) {
                    a.has_activity = true;
                    return true;
                }
            }
            false
        })
    }

    // --- proposals -------------------------------------------------------

    pub fn store_tx(&self, proposal: &TxProposal) {
        self.with(|c| {
            if let Some(txid) = &proposal.txid {
                c.txid_index
                    .insert(txid.clone(), (proposal.wallet_id.clone(), proposal.id.clone()));
            }
            let list = c.proposals.entry(proposal.wallet_id.clone()).or_default();
            match list.iter_mut().find(|t| t.id == proposal.id) {
                Some(existing) => *existing = proposal.clone(),
                None => list.push(proposal.clone()),
            }
        })
    }

    pub fn fetch_tx(&self, wallet_id: &str, proposal_id: &str) -> Option<TxProposal> {
        self.with(|c| {
            c.proposals
                .get(wallet_id)
                .and_then(|list| list.iter().find(|t| t.id == proposal_id).cloned())
        })
    }

    pub fn fetch_tx_by_hash(&self, txid: &str) -> Option<TxProposal> {
        self.with(|c| {
            let (wallet_id, proposal_id) = c.txid_index.get(txid)?.clone();
            c.proposals
                .get(&wallet_id)
                .and_then(|list| list.iter().find(|t| t.id == proposal_id).cloned())
        })
    }

    pub fn remove_tx(&self, wallet_id: &str, proposal_id: &str) {
        self.with(|c| {
            if let Some(list) = c.proposals.get_mut(wallet_id) {
                list.retain(|t| t.id != proposal_id);
            }
        })
    }

    /// Newest-first listing with optional filters.
    pub fn fetch_txs(&self, wallet_id: &str, filter: &TxFilter) -> Vec<TxProposal> {
        self.with(|c| {
            let mut txs: Vec<TxProposal> = c
                .proposals
                .get(wallet_id)
                .map(|list| {
                    list.iter()
                        .filter(|t| {
                            if let Some(statuses) = &filter.status {
                                if !statuses.contains(&t.status) {
                                    return false;
                                }
                            }
                            if let Some(app) = filter.app {
                                if t.app != app {
                                    return false;
                                }
                            }
                            if let Some(min_ts) = filter.min_ts {
                                if t.created_on < min_ts {
                                    return false;
                                }
                            }
                            if let Some(max_ts) = filter.max_ts {
                                if t.created_on > max_ts {
                                    return false;
                                }
                            }
                            if let Some(is_pending) = filter.is_pending {
                                if t.is_pending() != is_pending {
                                    return false;
                                }
                            }
                            true
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            txs.sort_by(|a, b| b.created_on.cmp(&a.created_on));
            if let Some(limit) = filter.limit {
                txs.truncate(limit);
            }
            txs
        })
    }

    pub fn fetch_pending_txs(&self, wallet_id: &str) -> Vec<TxProposal> {
        self.fetch_txs(
            wallet_id,
            &TxFilter { status: Some(vec![ProposalStatus::Pending]), ..Default::default() },
        )
    }

    /// Latest non-temporary proposals, newest first, for the backoff governor.
    pub fn fetch_last_txs(&self, wallet_id: &str, limit: usize) -> Vec<TxProposal> {
        self.with(|c| {
            let mut txs: Vec<TxProposal> = c
                .proposals
                .get(wallet_id)
                .map(|list| {
                    list.iter()
                        .filter(|t| t.status != ProposalStatus::Temporary)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            txs.sort_by(|a, b| b.created_on.cmp(&a.created_on));
            txs.truncate(limit);
            txs
        })
    }

    // --- notifications ---------------------------------------------------

    /// Append a notification, assigning the wallet-scoped id and the
    /// process-wide ticker.
    pub fn store_notification(
        &self,
        wallet_id: &str,
        kind: &str,
        creator_id: Option<&str>,
        data: serde_json::Value,
    ) -> Notification {
        let ticker = self.ticker.fetch_add(1, Ordering::SeqCst) + 1;
        self.with(|c| {
            let seq = c.notification_seq.entry(wallet_id.to_string()).or_insert(0);
            *seq += 1;
            let notification = Notification {
                id: *seq,
                ticker,
                kind: kind.to_string(),
                wallet_id: wallet_id.to_string(),
                creator_id: creator_id.map(str::to_string),
                data,
                created_on: Utc::now(),
            };
            c.notifications
                .entry(wallet_id.to_string())
                .or_default()
                .push(notification.clone());
            notification
        })
    }

    pub fn fetch_notifications(
        &self,
        wallet_id: &str,
        min_ts: Option<DateTime<Utc>>,
        after_id: Option<u64>,
    ) -> Vec<Notification> {
        self.with(|c| {
            c.notifications
                .get(wallet_id)
                .map(|list| {
                    list.iter()
                        .filter(|n| min_ts.map_or(true, |ts| n.created_on >= ts))
                        .filter(|n| after_id.map_or(true, |id| n.id > id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn fetch_notifications_since(
        &self,
        wallet_id: &str,
        since: DateTime<Utc>,
    ) -> Vec<Notification> {
        self.fetch_notifications(wallet_id, Some(since), None)
    }

    // --- sessions --------------------------------------------------------

    pub fn store_session(&self, session: &Session) {
        self.with(|c| {
            c.sessions.insert(session.copayer_id.clone(), session.clone());
        })
    }

    pub fn fetch_session(&self, copayer_id: &str) -> Option<Session> {
        self.with(|c| c.sessions.get(copayer_id).cloned())
    }

    pub fn remove_session(&self, copayer_id: &str) {
        self.with(|c| {
            c.sessions.remove(copayer_id);
        })
    }

    // --- preferences -----------------------------------------------------

    pub fn store_preferences(&self, preferences: &Preferences) {
        self.with(|c| {
            c.preferences.insert(
                (preferences.wallet_id.clone(), preferences.copayer_id.clone()),
                preferences.clone(),
            );
        })
    }

    pub fn fetch_preferences(&self, wallet_id: &str, copayer_id: &str) -> Option<Preferences> {
        self.with(|c| {
            c.preferences
                .get(&(wallet_id.to_string(), copayer_id.to_string()))
                .cloned()
        })
    }

    // --- tx notes --------------------------------------------------------

    pub fn store_tx_note(&self, note: &TxNote) {
        self.with(|c| {
            c.tx_notes
                .insert((note.wallet_id.clone(), note.txid.clone()), note.clone());
        })
    }

    pub fn fetch_tx_note(&self, wallet_id: &str, txid: &str) -> Option<TxNote> {
        self.with(|c| {
            c.tx_notes
                .get(&(wallet_id.to_string(), txid.to_string()))
                .cloned()
        })
    }

    pub fn fetch_tx_notes_since(&self, wallet_id: &str, min_ts: DateTime<Utc>) -> Vec<TxNote> {
        self.with(|c| {
            c.tx_notes
                .values()
                .filter(|n| n.wallet_id == wallet_id && n.edited_on >= min_ts)
                .cloned()
                .collect()
        })
    }

    // --- confirmation subscriptions --------------------------------------

    pub fn store_tx_confirmation_sub(&self, sub: &TxConfirmationSub) {
        self.with(|c| {
            c.tx_confirmation_subs.retain(|s| {
                !(s.wallet_id == sub.wallet_id
                    && s.copayer_id == sub.copayer_id
                    && s.txid == sub.txid)
            });
            c.tx_confirmation_subs.push(sub.clone());
        })
    }

    pub fn fetch_active_tx_confirmation_subs(&self, txid: &str) -> Vec<TxConfirmationSub> {
        self.with(|c| {
            c.tx_confirmation_subs
                .iter()
                .filter(|s| s.is_active && s.txid == txid)
                .cloned()
                .collect()
        })
    }

    /// Deactivate atomically; returns the subs that were still active.
    pub fn deactivate_tx_confirmation_subs(&self, txid: &str) -> Vec<TxConfirmationSub> {
        self.with(|c| {
            let mut fired = Vec::new();
            for sub in c.tx_confirmation_subs.iter_mut() {
                if sub.is_active && sub.txid == txid {
                    sub.is_active = false;
                    fired.push(sub.clone());
                }
            }
            fired
        })
    }

    pub fn remove_tx_confirmation_sub(&self, copayer_id: &str, txid: &str) {
        self.with(|c| {
            c.tx_confirmation_subs
                .retain(|s| !(s.copayer_id == copayer_id && s.txid == txid));
        })
    }

    // --- push subscriptions ----------------------------------------------

    pub fn store_push_sub(&self, sub: &PushSub) {
        self.with(|c| {
            c.push_subs
                .retain(|s| !(s.copayer_id == sub.copayer_id && s.token == sub.token));
            c.push_subs.push(sub.clone());
        })
    }

    pub fn remove_push_sub(&self, copayer_id: &str, token: &str) {
        self.with(|c| {
            c.push_subs
                .retain(|s| !(s.copayer_id == copayer_id && s.token == token));
        })
    }

    pub fn fetch_push_subs(&self, copayer_id: &str) -> Vec<PushSub> {
        self.with(|c| {
            c.push_subs
                .iter()
                .filter(|s| s.copayer_id == copayer_id)
                .cloned()
                .collect()
        })
    }

    // --- assets ----------------------------------------------------------

    pub fn upsert_asset(&self, asset: &Asset) {
        self.with(|c| {
            c.assets.insert(asset.asset.clone(), asset.clone());
        })
    }

    pub fn fetch_asset(&self, asset_id: &str) -> Option<Asset> {
        self.with(|c| c.assets.get(asset_id).cloned())
    }

    pub fn fetch_assets(&self) -> Vec<Asset> {
        self.with(|c| c.assets.values().cloned().collect())
    }

    pub fn asset_ticker_taken(&self, ticker: &str) -> bool {
        self.with(|c| c.assets.values().any(|a| a.ticker == ticker))
    }

    // --- fiat rates ------------------------------------------------------

    pub fn store_fiat_rate(&self, rate: &FiatRate) {
        self.with(|c| c.fiat_rates.push(rate.clone()))
    }

    /// The stored rate closest to (and not newer than) `ts`, within
    /// `max_look_back` seconds.
    pub fn fetch_nearest_fiat_rate(
        &self,
        code: &str,
        provider: Option<&str>,
        ts: DateTime<Utc>,
        max_look_back_secs: i64,
    ) -> Option<FiatRate> {
        let cutoff = ts - Duration::seconds(max_look_back_secs);
        self.with(|c| {
            c.fiat_rates
                .iter()
                .filter(|r| r.code == code)
                .filter(|r| provider.map_or(true, |p| r.provider == p))
                .filter(|r| r.ts <= ts && r.ts >= cutoff)
                .max_by_key(|r| r.ts)
                .cloned()
        })
    }

    // --- broadcast log ---------------------------------------------------

    pub fn log_broadcast(&self, entry: &BroadcastLogEntry) {
        self.with(|c| c.broadcast_log.push(entry.clone()))
    }

    /// Most recent broadcasts of a wallet within `window_secs`, newest
    /// first, capped at `cap` entries.
    pub fn fetch_recent_broadcasts(
        &self,
        wallet_id: &str,
        window_secs: i64,
        cap: usize,
    ) -> Vec<BroadcastLogEntry> {
        let cutoff = Utc::now() - Duration::seconds(window_secs);
        self.with(|c| {
            let mut entries: Vec<BroadcastLogEntry> = c
                .broadcast_log
                .iter()
                .filter(|e| e.wallet_id == wallet_id && e.broadcasted_on >= cutoff)
                .cloned()
                .collect();
            entries.sort_by(|a, b| b.broadcasted_on.cmp(&a.broadcasted_on));
            entries.truncate(cap);
            entries
        })
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_ids_increase_per_wallet() {
        let storage = Storage::new();
        let n1 = storage.store_notification("w1", "NewTxProposal", None, serde_json::Value::Null);
        let n2 = storage.store_notification("w1", "NewTxProposal", None, serde_json::Value::Null);
        let other = storage.store_notification("w2", "NewTxProposal", None, serde_json::Value::Null);

        assert_eq!(n1.id, 1);
        assert_eq!(n2.id, 2);
        assert_eq!(other.id, 1);
        assert!(n2.ticker > n1.ticker);
        assert!(other.ticker > n2.ticker);
    }

    #[test]
    fn notification_pagination_after_id() {
        let storage = Storage::new();
        for _ in 0..5 {
            storage.store_notification("w1", "NewIncomingTx", None, serde_json::Value::Null);
        }
        let page = storage.fetch_notifications("w1", None, Some(3));
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|n| n.id > 3));
    }

    #[test]
    fn confirmation_subs_deactivate_once() {
        let storage = Storage::new();
        storage.store_tx_confirmation_sub(&TxConfirmationSub {
            wallet_id: "w1".into(),
            copayer_id: "c1".into(),
            txid: "unit1".into(),
            is_active: true,
            created_on: Utc::now(),
        });

        let fired = storage.deactivate_tx_confirmation_subs("unit1");
        assert_eq!(fired.len(), 1);
        let again = storage.deactivate_tx_confirmation_subs("unit1");
        assert!(again.is_empty());
    }

    #[test]
    fn nearest_fiat_rate_respects_look_back() {
        let storage = Storage::new();
        let now = Utc::now();
        storage.store_fiat_rate(&FiatRate {
            code: "USD".into(),
            provider: "exchange".into(),
            value: 12.5,
            ts: now - Duration::seconds(60),
        });

        let hit = storage.fetch_nearest_fiat_rate("USD", None, now, 120);
        assert_eq!(hit.unwrap().value, 12.5);

        let miss = storage.fetch_nearest_fiat_rate("USD", None, now, 30);
        assert!(miss.is_none());
    }
}
