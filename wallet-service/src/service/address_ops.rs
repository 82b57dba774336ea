//! Address engine: derivation on demand, gap-limit accounting, scan.

use chrono::Utc;

use crate::derivation;
use crate::error::ServiceError;
use crate::model::address::derivation_path;
use crate::model::{Address, ScanStatus, Wallet};

use super::WalletService;

/// Misses tolerated per branch when power-scanning with a stride.
const POWER_SCAN_GAP: u32 = 3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanResult {
    pub found_main: usize,
    pub found_change: usize,
}

impl WalletService {
    /// Create (or for single-address wallets, return) a receive address.
    ///
    /// The gap-limit policy refuses new derivation once the last
    /// `max_main_address_gap` receive addresses are all inactive; the tail
    /// is re-probed against the explorer first, so freshly used addresses
    /// unblock without a scan.
    pub async fn create_address(
        &self,
        wallet_id: &str,
        ignore_max_gap: bool,
    ) -> Result<Address, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let wallet = self.storage.fetch_wallet(wallet_id)?;
                check_address_ops_allowed(&wallet)?;

                let addresses = self.storage.fetch_addresses(wallet_id);
                let main: Vec<&Address> = addresses.iter().filter(|a| !a.is_change).collect();

                if wallet.single_address {
                    if let Some(first) = main.first() {
                        return Ok((*first).clone());
                    }
                } else if !ignore_max_gap {
                    self.check_main_address_gap(&wallet, &main).await?;
                }

                let index = main.len() as u32;
                let address = self.derive_and_store(&wallet, false, index, false)?;
                log::debug!("wallet {} new receive address at {}", wallet_id, address.path);
                Ok(address)
            })
            .await
    }

    /// Probe the inactive tail against the explorer; any observed activity
    /// flips the sticky flag and allows progress.
    async fn check_main_address_gap(
        &self,
        wallet: &Wallet,
        main: &[&Address],
    ) -> Result<(), ServiceError> {
        let gap = self.config.max_main_address_gap as usize;
        if main.len() < gap {
            return Ok(());
        }
        let tail = &main[main.len() - gap..];
        if tail.iter().any(|a| a.has_activity) {
            return Ok(());
        }

        let mut any_activity = false;
        for address in tail {
            if self.explorer.get_address_activity(&address.address).await? {
                self.storage.mark_address_activity(&wallet.id, &address.address);
                any_activity = true;
            }
        }
        if any_activity {
            Ok(())
        } else {
            Err(ServiceError::MainAddressGapReached)
        }
    }

    fn derive_and_store(
        &self,
        wallet: &Wallet,
        is_change: bool,
        index: u32,
        has_activity: bool,
    ) -> Result<Address, ServiceError> {
        let derived = derivation::derive_address(wallet, is_change, index)?;
        let address = Address {
            address: derived.address,
            wallet_id: wallet.id.clone(),
            path: derivation_path(is_change, index),
            is_change,
            address_type: wallet.address_type,
            definition: derived.definition,
            signing_paths: derived.signing_paths,
            has_activity,
            created_on: Utc::now(),
        };
        self.storage.store_address(&address);
        self.broker.add_address(address.address.clone());
        Ok(address)
    }

    /// List receive addresses in derivation order.
    pub fn get_main_addresses(
        &self,
        wallet_id: &str,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<Address>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        let mut main: Vec<Address> = self
            .storage
            .fetch_addresses(wallet_id)
            .into_iter()
            .filter(|a| !a.is_change)
            .collect();
        if reverse {
            main.reverse();
        }
        if let Some(limit) = limit {
            main.truncate(limit);
        }
        Ok(main)
    }

    /// Walk both derivation branches probing the explorer for activity,
    /// persisting every address up to the last active one.
    ///
    /// `starting_step > 1` is the power-scan variant: it jumps ahead by the
    /// stride, remembers skipped paths, and backfills them once a hit
    /// proves the range is in use. A pass that observes no activity at all
    /// persists nothing.
    pub async fn scan_addresses(
        &self,
        wallet_id: &str,
        starting_step: u32,
    ) -> Result<ScanResult, ServiceError> {
        let wallet = self
            .locks
            .run_locked_default(wallet_id, || async {
                let mut wallet = self.storage.fetch_wallet(wallet_id)?;
                if !wallet.is_complete() {
                    return Err(ServiceError::WalletNotComplete);
                }
                if wallet.scan_status == ScanStatus::Running {
                    return Err(ServiceError::WalletBusy);
                }
                wallet.scan_status = ScanStatus::Running;
                self.storage.store_wallet(&wallet);
                Ok(wallet)
            })
            .await?;

        // The walk happens outside the lock: probing the explorer for a
        // deep wallet can far exceed the hold budget, and concurrent
        // address creation is already refused by scan_status.
        let scanned = self.scan_both_branches(&wallet, starting_step.max(1)).await;

        self.locks
            .run_locked(wallet_id, self.server_lock_opts(), || async {
                let mut wallet = self.storage.fetch_wallet(wallet_id)?;
                match scanned {
                    Ok((main, change)) => {
                        let result = ScanResult {
                            found_main: main.len(),
                            found_change: change.len(),
                        };
                        for address in main.into_iter().chain(change) {
                            // has_activity is sticky; never downgrade an
                            // address we already know about.
                            match self.storage.fetch_address(wallet_id, &address.address) {
                                Some(_) if address.has_activity => {
                                    self.storage.mark_address_activity(wallet_id, &address.address);
                                }
                                Some(_) => {}
                                None => {
                                    self.storage.store_address(&address);
                                    self.broker.add_address(address.address.clone());
                                }
                            }
                        }
                        wallet.scan_status = ScanStatus::Success;
                        self.storage.store_wallet(&wallet);
                        self.notify(
                            wallet_id,
                            crate::model::notification::kinds::SCAN_FINISHED,
                            None,
                            serde_json::json!({
                                "foundMain": result.found_main,
                                "foundChange": result.found_change,
                            }),
                        );
                        Ok(result)
                    }
                    Err(e) => {
                        wallet.scan_status = ScanStatus::Error;
                        self.storage.store_wallet(&wallet);
                        log::warn!("scan of wallet {} failed: {}", wallet_id, e);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn scan_both_branches(
        &self,
        wallet: &Wallet,
        step: u32,
    ) -> Result<(Vec<Address>, Vec<Address>), ServiceError> {
        let main = self.scan_branch(wallet, false, step).await?;
        let change = self.scan_branch(wallet, true, step).await?;
        Ok((main, change))
    }

    async fn scan_branch(
        &self,
        wallet: &Wallet,
        is_change: bool,
        step: u32,
    ) -> Result<Vec<Address>, ServiceError> {
        let max_inactive = if step > 1 { POWER_SCAN_GAP } else { self.config.scan_address_gap };

        let mut found = Vec::new();
        // Paths walked or jumped over since the last hit; they only become
        // addresses if a later hit proves the range is in use.
        let mut pending: Vec<u32> = Vec::new();
        let mut index = 0u32;
        let mut inactive = 0u32;

        loop {
            let derived = derivation::derive_address(wallet, is_change, index)?;
            let active = self.explorer.get_address_activity(&derived.address).await?;

            if active {
                for skipped in pending.drain(..) {
                    found.push(self.build_address(wallet, is_change, skipped, false)?);
                }
                found.push(Address {
                    address: derived.address,
                    wallet_id: wallet.id.clone(),
                    path: derivation_path(is_change, index),
                    is_change,
                    address_type: wallet.address_type,
                    definition: derived.definition,
                    signing_paths: derived.signing_paths,
                    has_activity: true,
                    created_on: Utc::now(),
                });
                inactive = 0;
            } else {
                pending.push(index);
                inactive += 1;
                if inactive >= max_inactive {
                    break;
                }
            }

            for skipped in index + 1..index + step {
                pending.push(skipped);
            }
            index += step;
        }
        Ok(found)
    }

    fn build_address(
        &self,
        wallet: &Wallet,
        is_change: bool,
        index: u32,
        has_activity: bool,
    ) -> Result<Address, ServiceError> {
        let derived = derivation::derive_address(wallet, is_change, index)?;
        Ok(Address {
            address: derived.address,
            wallet_id: wallet.id.clone(),
            path: derivation_path(is_change, index),
            is_change,
            address_type: wallet.address_type,
            definition: derived.definition,
            signing_paths: derived.signing_paths,
            has_activity,
            created_on: Utc::now(),
        })
    }

    /// Select the change address for a new proposal: single-address wallets
    /// reuse the first address, otherwise the first inactive change address,
    /// created lazily when none exists.
    pub(crate) fn select_change_address(&self, wallet: &Wallet) -> Result<Address, ServiceError> {
        let addresses = self.storage.fetch_addresses(&wallet.id);

        if wallet.single_address {
            return addresses
                .iter()
                .find(|a| !a.is_change)
                .cloned()
                .map_or_else(|| self.derive_and_store(wallet, false, 0, false), Ok);
        }

        if let Some(idle) = addresses.iter().find(|a| a.is_change && !a.has_activity) {
            return Ok(idle.clone());
        }
        let next_index = addresses.iter().filter(|a| a.is_change).count() as u32;
        self.derive_and_store(wallet, true, next_index, false)
    }
}

/// Scan-status gating shared by address-creating operations.
pub(crate) fn check_address_ops_allowed(wallet: &Wallet) -> Result<(), ServiceError> {
    if !wallet.is_complete() {
        return Err(ServiceError::WalletNotComplete);
    }
    match wallet.scan_status {
        ScanStatus::Running => Err(ServiceError::WalletBusy),
        ScanStatus::Error => Err(ServiceError::WalletNeedScan),
        _ => Ok(()),
    }
}
