//! Wallet formation: creation, copayer joins, access keys.

use chrono::Utc;

use crate::derivation;
use crate::error::ServiceError;
use crate::model::notification::kinds;
use crate::model::{
    AddressType, Copayer, CopayerLookup, DerivationStrategy, Network, RequestKey, ScanStatus,
    Wallet, WalletStatus,
};
use crate::sigs;

use super::WalletService;

pub const MIN_COPAYERS: usize = 1;
pub const MAX_COPAYERS: usize = 15;

#[derive(Debug, Clone)]
pub struct CreateWalletRequest {
    pub id: Option<String>,
    pub name: String,
    pub m: usize,
    pub n: usize,
    pub pub_key: String,
    pub coin: Option<String>,
    pub network: Network,
    pub single_address: bool,
    pub support_bip44: bool,
}

#[derive(Debug, Clone)]
pub struct JoinWalletRequest {
    pub wallet_id: String,
    pub name: String,
    pub xpub: String,
    pub request_pub_key: String,
    pub copayer_signature: String,
    pub device_id: String,
    pub account: u32,
    pub coin: Option<String>,
    pub network: Option<Network>,
    pub custom_data: Option<serde_json::Value>,
    pub dry_run: bool,
    pub support_bip44: bool,
}

fn check_m_n(m: usize, n: usize) -> Result<(), ServiceError> {
    if m < MIN_COPAYERS || n < m || n > MAX_COPAYERS {
        return Err(ServiceError::BadRequest(
            "invalid combination of required copayers / total copayers".to_string(),
        ));
    }
    Ok(())
}

impl WalletService {
    /// Create a wallet in `pending` status; copayers join afterwards.
    pub async fn create_wallet(&self, req: CreateWalletRequest) -> Result<String, ServiceError> {
        check_m_n(req.m, req.n)?;
        if req.name.trim().is_empty() {
            return Err(ServiceError::BadRequest("wallet name is required".to_string()));
        }

        let wallet_id = match req.id {
            Some(id) => {
                if self.storage.wallet_exists(&id) {
                    return Err(ServiceError::WalletAlreadyExists);
                }
                id
            }
            None => sigs::new_random_id(),
        };

        let wallet = Wallet {
            id: wallet_id.clone(),
            name: req.name,
            m: req.m,
            n: req.n,
            coin: req.coin.unwrap_or_else(|| "obyte".to_string()),
            network: req.network,
            derivation_strategy: if req.support_bip44 {
                DerivationStrategy::Bip44
            } else {
                DerivationStrategy::Legacy
            },
            address_type: if req.n == 1 { AddressType::Normal } else { AddressType::Shared },
            single_address: req.single_address,
            pub_key: req.pub_key,
            definition_template: derivation::initial_template(req.m, req.n),
            copayers: Vec::new(),
            scan_status: ScanStatus::Idle,
            status: WalletStatus::Pending,
            created_on: Utc::now(),
        };

        self.storage.store_wallet(&wallet);
        log::info!("wallet {} created ({}-of-{})", wallet.id, wallet.m, wallet.n);
        Ok(wallet_id)
    }

    /// Join a copayer to a pending wallet.
    ///
    /// The declared `(name, xpub, requestPubKey)` triple must carry a valid
    /// signature under the wallet creation key. On the nth join the wallet
    /// completes, the template is re-keyed to device ids and frozen, and
    /// `WalletComplete` is emitted (never for 1-of-1 wallets).
    pub async fn join_wallet(&self, req: JoinWalletRequest) -> Result<Wallet, ServiceError> {
        let wallet_id = req.wallet_id.clone();
        self.locks
            .run_locked_default(&wallet_id, || async { self.join_wallet_locked(req).await })
            .await
    }

    async fn join_wallet_locked(&self, req: JoinWalletRequest) -> Result<Wallet, ServiceError> {
        let mut wallet = self.storage.fetch_wallet(&req.wallet_id)?;

        if let Some(coin) = &req.coin {
            if *coin != wallet.coin {
                return Err(ServiceError::BadRequest("coin does not match wallet".to_string()));
            }
        }
        if let Some(network) = req.network {
            if network != wallet.network {
                return Err(ServiceError::BadRequest("network does not match wallet".to_string()));
            }
        }
        if wallet.derivation_strategy == DerivationStrategy::Bip44 && !req.support_bip44 {
            return Err(ServiceError::UpgradeNeeded);
        }

        let message = format!("{}|{}|{}", req.name, req.xpub, req.request_pub_key);
        sigs::verify_message(&wallet.pub_key, &message, &req.copayer_signature)?;

        if wallet.is_complete() {
            return Err(ServiceError::WalletFull);
        }
        if wallet.copayers.iter().any(|c| c.xpub == req.xpub) {
            return Err(ServiceError::CopayerInWallet);
        }

        let copayer_id = sigs::copayer_id_from_xpub(&req.xpub);
        if self.storage.fetch_copayer_lookup(&copayer_id).is_some() {
            return Err(ServiceError::CopayerRegistered);
        }

        let copayer = Copayer {
            id: copayer_id.clone(),
            name: req.name,
            xpub: req.xpub,
            account: req.account,
            device_id: req.device_id,
            request_pub_keys: vec![RequestKey {
                key: req.request_pub_key,
                signature: req.copayer_signature,
            }],
            custom_data: req.custom_data,
            created_on: Utc::now(),
        };

        if req.dry_run {
            let mut preview = wallet.clone();
            preview.copayers.push(copayer);
            if preview.copayers.len() == preview.n {
                preview.status = WalletStatus::Complete;
            }
            return Ok(preview);
        }

        wallet.copayers.push(copayer.clone());
        let completing = wallet.copayers.len() == wallet.n;
        if completing {
            wallet.status = WalletStatus::Complete;
            wallet.definition_template =
                derivation::rekey_template(&wallet.definition_template, &wallet.copayers);
        }
        self.storage.store_wallet(&wallet);
        self.storage.store_copayer_lookup(&CopayerLookup {
            copayer_id: copayer.id.clone(),
            wallet_id: wallet.id.clone(),
            request_pub_keys: copayer.request_pub_keys.clone(),
            is_support_staff: self.is_support_staff(&copayer.id),
        });

        self.notify(
            &wallet.id,
            kinds::NEW_COPAYER,
            Some(&copayer.id),
            serde_json::json!({ "copayerId": copayer.id, "copayerName": copayer.name }),
        );
        if completing && wallet.n > 1 {
            self.notify(&wallet.id, kinds::WALLET_COMPLETE, None, serde_json::Value::Null);
        }

        log::info!(
            "copayer {} joined wallet {} ({}/{})",
            copayer.id,
            wallet.id,
            wallet.copayers.len(),
            wallet.n
        );
        Ok(wallet)
    }

    /// Rotate in a new request public key for a copayer. The new key must be
    /// signed by the key derived from the copayer's xpub along the
    /// request-key-auth path.
    pub async fn add_access(
        &self,
        copayer_id: &str,
        new_request_pub_key: String,
        signature: String,
    ) -> Result<(), ServiceError> {
        let lookup = self
            .storage
            .fetch_copayer_lookup(copayer_id)
            .ok_or(ServiceError::CopayerNotFound)?;
        let wallet_id = lookup.wallet_id.clone();

        self.locks
            .run_locked_default(&wallet_id, || async {
                let mut wallet = self.storage.fetch_wallet(&wallet_id)?;
                let copayer = wallet
                    .copayers
                    .iter_mut()
                    .find(|c| c.id == copayer_id)
                    .ok_or(ServiceError::CopayerNotFound)?;

                let (change, index) = derivation::REQUEST_KEY_AUTH_PATH;
                let auth_key = derivation::derive_pubkey(&copayer.xpub, change, index)?;
                sigs::verify_message(&auth_key, &new_request_pub_key, &signature)?;

                if copayer.request_pub_keys.len() >= self.config.max_keys {
                    return Err(ServiceError::TooManyKeys);
                }
                copayer.request_pub_keys.insert(
                    0,
                    RequestKey { key: new_request_pub_key, signature },
                );

                let request_pub_keys = copayer.request_pub_keys.clone();
                self.storage.store_wallet(&wallet);
                self.storage.store_copayer_lookup(&CopayerLookup {
                    copayer_id: copayer_id.to_string(),
                    wallet_id: wallet_id.clone(),
                    request_pub_keys,
                    is_support_staff: lookup.is_support_staff
                        || self.is_support_staff(copayer_id),
                });
                Ok(())
            })
            .await
    }

    /// Whether a copayer id is provisioned as support staff.
    pub(crate) fn is_support_staff(&self, copayer_id: &str) -> bool {
        self.config.support_staff.iter().any(|id| id == copayer_id)
    }

    pub fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, ServiceError> {
        self.storage.fetch_wallet(wallet_id)
    }

    /// Resolve a wallet for an authenticated caller. Support staff may pass
    /// any wallet id, address or txid; everyone else is bound to their own
    /// wallet id.
    pub fn get_wallet_from_identifier_for(
        &self,
        auth: &crate::auth::AuthedCopayer,
        identifier: &str,
    ) -> Result<Wallet, ServiceError> {
        if !auth.is_support_staff && identifier != auth.wallet_id {
            return Err(ServiceError::CopayerNotFound);
        }
        self.get_wallet_from_identifier(identifier)
    }

    /// Resolve a wallet from a wallet id, one of its addresses, or the txid
    /// of one of its proposals. The widened lookups are support-staff only;
    /// [`Self::get_wallet_from_identifier_for`] enforces that.
    pub fn get_wallet_from_identifier(&self, identifier: &str) -> Result<Wallet, ServiceError> {
        if let Ok(wallet) = self.storage.fetch_wallet(identifier) {
            return Ok(wallet);
        }
        if let Some(wallet_id) = self.storage.fetch_wallet_id_for_address(identifier) {
            return self.storage.fetch_wallet(&wallet_id);
        }
        if let Some(tx) = self.storage.fetch_tx_by_hash(identifier) {
            return self.storage.fetch_wallet(&tx.wallet_id);
        }
        Err(ServiceError::WalletNotFound)
    }

    /// Update the wallet display name and/or the caller's copayer name.
    pub async fn update_wallet(
        &self,
        wallet_id: &str,
        copayer_id: &str,
        wallet_name: Option<String>,
        copayer_name: Option<String>,
    ) -> Result<Wallet, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let mut wallet = self.storage.fetch_wallet(wallet_id)?;
                if let Some(name) = wallet_name {
                    if name.trim().is_empty() {
                        return Err(ServiceError::BadRequest("wallet name is required".to_string()));
                    }
                    wallet.name = name;
                }
                if let Some(name) = copayer_name {
                    let copayer = wallet
                        .copayers
                        .iter_mut()
                        .find(|c| c.id == copayer_id)
                        .ok_or(ServiceError::CopayerNotFound)?;
                    copayer.name = name;
                }
                self.storage.store_wallet(&wallet);
                Ok(wallet)
            })
            .await
    }

    /// Copayers registered under a device id, across wallets.
    pub fn get_copayers_by_device(&self, device_id: &str) -> Vec<(String, Copayer)> {
        let mut found = Vec::new();
        for wallet_id in self.storage.fetch_all_wallet_ids() {
            if let Ok(wallet) = self.storage.fetch_wallet(&wallet_id) {
                for copayer in &wallet.copayers {
                    if copayer.device_id == device_id {
                        found.push((wallet_id.clone(), copayer.clone()));
                    }
                }
            }
        }
        found
    }
}
