//! Notifications, preferences, tx notes, subscriptions, assets, fiat rates.

use chrono::{DateTime, Duration, Utc};

use crate::error::ServiceError;
use crate::model::{
    Asset, FiatRate, Notification, Preferences, PushSub, TxConfirmationSub, TxNote,
};

use super::WalletService;

impl WalletService {
    /// Notifications for a wallet, paginated either by a bounded time span
    /// or strictly after a previously seen notification id.
    pub fn get_notifications(
        &self,
        wallet_id: &str,
        timespan_secs: Option<i64>,
        after_id: Option<u64>,
    ) -> Result<Vec<Notification>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;

        let min_ts = if after_id.is_some() {
            None
        } else {
            let span = timespan_secs
                .unwrap_or(self.config.notifications_timespan)
                .min(self.config.max_notifications_timespan);
            Some(Utc::now() - Duration::seconds(span))
        };
        Ok(self.storage.fetch_notifications(wallet_id, min_ts, after_id))
    }

    pub fn get_preferences(&self, wallet_id: &str, copayer_id: &str) -> Preferences {
        self.storage
            .fetch_preferences(wallet_id, copayer_id)
            .unwrap_or(Preferences {
                wallet_id: wallet_id.to_string(),
                copayer_id: copayer_id.to_string(),
                ..Default::default()
            })
    }

    pub fn save_preferences(
        &self,
        wallet_id: &str,
        copayer_id: &str,
        email: Option<String>,
        language: Option<String>,
        unit: Option<String>,
    ) -> Result<Preferences, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        let mut preferences = self.get_preferences(wallet_id, copayer_id);
        if email.is_some() {
            preferences.email = email;
        }
        if language.is_some() {
            preferences.language = language;
        }
        if unit.is_some() {
            preferences.unit = unit;
        }
        self.storage.store_preferences(&preferences);
        Ok(preferences)
    }

    pub async fn edit_tx_note(
        &self,
        wallet_id: &str,
        copayer_id: &str,
        txid: &str,
        body: String,
    ) -> Result<TxNote, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let now = Utc::now();
                let note = match self.storage.fetch_tx_note(wallet_id, txid) {
                    Some(mut existing) => {
                        existing.body = body;
                        existing.edited_by = copayer_id.to_string();
                        existing.edited_on = now;
                        existing
                    }
                    None => TxNote {
                        wallet_id: wallet_id.to_string(),
                        txid: txid.to_string(),
                        body,
                        edited_by: copayer_id.to_string(),
                        edited_on: now,
                        created_on: now,
                    },
                };
                self.storage.store_tx_note(&note);
                Ok(note)
            })
            .await
    }

    pub fn get_tx_note(&self, wallet_id: &str, txid: &str) -> Result<TxNote, ServiceError> {
        self.storage
            .fetch_tx_note(wallet_id, txid)
            .ok_or(ServiceError::TxNotFound)
    }

    pub fn get_tx_notes_since(
        &self,
        wallet_id: &str,
        min_ts: Option<DateTime<Utc>>,
    ) -> Vec<TxNote> {
        let min_ts = min_ts.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.storage.fetch_tx_notes_since(wallet_id, min_ts)
    }

    /// Subscribe to a single confirmation notification for a txid.
    pub fn subscribe_tx_confirmation(
        &self,
        wallet_id: &str,
        copayer_id: &str,
        txid: String,
    ) -> Result<(), ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        self.storage.store_tx_confirmation_sub(&TxConfirmationSub {
            wallet_id: wallet_id.to_string(),
            copayer_id: copayer_id.to_string(),
            txid,
            is_active: true,
            created_on: Utc::now(),
        });
        Ok(())
    }

    pub fn unsubscribe_tx_confirmation(&self, copayer_id: &str, txid: &str) {
        self.storage.remove_tx_confirmation_sub(copayer_id, txid);
    }

    pub fn subscribe_push(&self, copayer_id: &str, token: String, platform: Option<String>) {
        self.storage.store_push_sub(&PushSub {
            copayer_id: copayer_id.to_string(),
            token,
            platform,
            created_on: Utc::now(),
        });
    }

    pub fn unsubscribe_push(&self, copayer_id: &str, token: &str) {
        self.storage.remove_push_sub(copayer_id, token);
    }

    pub fn get_assets(&self) -> Vec<Asset> {
        self.storage.fetch_assets()
    }

    pub fn get_asset(&self, asset_id: &str) -> Result<Asset, ServiceError> {
        self.storage
            .fetch_asset(asset_id)
            .ok_or_else(|| ServiceError::BadRequest(format!("unknown asset {}", asset_id)))
    }

    /// The stored fiat rate closest to `ts` within the look-back window.
    pub fn get_fiat_rate(
        &self,
        code: &str,
        provider: Option<&str>,
        ts: Option<DateTime<Utc>>,
    ) -> Result<FiatRate, ServiceError> {
        let ts = ts.unwrap_or_else(Utc::now);
        self.storage
            .fetch_nearest_fiat_rate(code, provider, ts, self.config.fiat_rate_max_look_back)
            .ok_or_else(|| ServiceError::BadRequest(format!("no rate for {}", code)))
    }

    pub fn store_fiat_rate(&self, rate: FiatRate) {
        self.storage.store_fiat_rate(&rate);
    }
}
