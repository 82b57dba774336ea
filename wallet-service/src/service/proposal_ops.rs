//! Proposal engine: create, publish, sign, reject, broadcast, remove.
//!
//! Status machine:
//!
//! ```text
//!  temporary --publish--> pending --m accepts--> accepted --broadcast--> broadcasted
//!                 |          |
//!                 |          `-- requiredRejections rejects --> rejected
//!                 `-- remove (creator, no foreign actions)
//! ```

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::compose;
use crate::derivation;
use crate::error::ServiceError;
use crate::model::notification::kinds;
use crate::model::{
    ActionKind, BroadcastLogEntry, Output, ProposalAction, ProposalStatus, TxApp, TxProposal,
};
use crate::sigs;
use crate::storage::TxFilter;

use super::address_ops::check_address_ops_allowed;
use super::WalletService;

#[derive(Debug, Clone)]
pub struct CreateTxRequest {
    pub tx_proposal_id: Option<String>,
    pub app: TxApp,
    /// App-specific parameters; the payload for non-payment apps.
    pub params: serde_json::Value,
    pub outputs: Vec<Output>,
    pub dry_run: bool,
}

impl WalletService {
    /// Create a proposal draft in `temporary` status.
    ///
    /// Idempotent on `tx_proposal_id`: an existing non-temporary proposal is
    /// returned unchanged, an existing temporary one is recomposed against
    /// the current UTXO set.
    pub async fn create_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        req: CreateTxRequest,
    ) -> Result<TxProposal, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                self.create_tx_locked(copayer_id, wallet_id, req).await
            })
            .await
    }

    async fn create_tx_locked(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        req: CreateTxRequest,
    ) -> Result<TxProposal, ServiceError> {
        let wallet = self.storage.fetch_wallet(wallet_id)?;
        check_address_ops_allowed(&wallet)?;

        if let Some(id) = &req.tx_proposal_id {
            if let Some(existing) = self.storage.fetch_tx(wallet_id, id) {
                if existing.status != ProposalStatus::Temporary {
                    return Ok(existing);
                }
                // A temporary draft with the same id is recomposed below.
            }
        }

        validate_app_params(req.app, &req.params, &req.outputs)?;
        self.check_create_backoff(wallet_id)?;

        let change_address = self.select_change_address(&wallet)?;
        let addresses = self.storage.fetch_addresses(wallet_id);
        let view = self.get_utxo_view(&wallet, None, None).await?;
        let available: Vec<_> = view
            .into_iter()
            .filter(|v| !v.locked)
            .map(|v| v.record)
            .collect();

        let composed = compose::compose_joint(
            &wallet,
            &addresses,
            &available,
            req.app,
            &req.params,
            &req.outputs,
            Some(&change_address),
        )?;

        let proposal = TxProposal {
            id: req.tx_proposal_id.unwrap_or_else(sigs::new_random_id),
            wallet_id: wallet_id.to_string(),
            creator_id: copayer_id.to_string(),
            app: req.app,
            params: req.params,
            outputs: req.outputs,
            change_address: Some(change_address),
            joint: composed.joint,
            inputs: composed.inputs,
            signing_info: composed.signing_info,
            required_signatures: wallet.m,
            required_rejections: wallet.required_rejections(),
            status: ProposalStatus::Temporary,
            actions: Vec::new(),
            txid: None,
            proposal_signature: None,
            broadcasted_on: None,
            is_stable: false,
            stabilized_on: None,
            created_on: Utc::now(),
        };

        if req.dry_run {
            return Ok(proposal);
        }
        self.storage.store_tx(&proposal);
        Ok(proposal)
    }

    /// The backoff governor: once more than `backoff_offset` consecutive
    /// trailing proposals were rejected, creation is refused until
    /// `backoff_time` has passed since the most recent rejection. Any
    /// non-rejected outcome in the window clears the counter.
    fn check_create_backoff(&self, wallet_id: &str) -> Result<(), ServiceError> {
        let window = self.config.backoff_offset + 1;
        let last = self.storage.fetch_last_txs(wallet_id, window);
        if last.len() < window || !last.iter().all(|t| t.status == ProposalStatus::Rejected) {
            return Ok(());
        }

        let last_rejection = last[0]
            .actions
            .iter()
            .filter(|a| a.kind == ActionKind::Reject)
            .map(|a| a.created_on)
            .max()
            .unwrap_or(last[0].created_on);
        let until = last_rejection + Duration::seconds(self.config.backoff_time);
        if Utc::now() < until {
            return Err(ServiceError::TxCannotCreate(format!(
                "too many rejected proposals, retry after {}",
                until.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Publish a temporary draft: verify the creator's signature over the
    /// draft-joint hash, re-check the reservation view, move to `pending`.
    pub async fn publish_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        proposal_id: &str,
        proposal_signature: &str,
    ) -> Result<TxProposal, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let mut tx = self
                    .storage
                    .fetch_tx(wallet_id, proposal_id)
                    .ok_or(ServiceError::TxNotFound)?;
                if tx.creator_id != copayer_id {
                    return Err(ServiceError::TxNotFound);
                }
                if tx.status != ProposalStatus::Temporary {
                    return Err(ServiceError::TxNotPending);
                }

                let wallet = self.storage.fetch_wallet(wallet_id)?;
                let copayer = wallet
                    .copayer(copayer_id)
                    .ok_or(ServiceError::CopayerNotFound)?;

                let draft_hash = compose::unit_hash(&tx.joint.unit)?;
                let verified = copayer.request_pub_keys.iter().any(|k| {
                    sigs::verify_message(&k.key, &draft_hash, proposal_signature).is_ok()
                });
                if !verified {
                    return Err(ServiceError::InvalidSignature);
                }

                self.check_utxos_available(&wallet, &tx.inputs, &tx.id).await?;

                tx.status = ProposalStatus::Pending;
                tx.proposal_signature = Some(proposal_signature.to_string());
                self.storage.store_tx(&tx);

                self.notify(
                    wallet_id,
                    kinds::NEW_TX_PROPOSAL,
                    Some(copayer_id),
                    serde_json::json!({ "txProposalId": tx.id, "app": tx.app.as_str() }),
                );
                Ok(tx)
            })
            .await
    }

    /// Record a copayer's acceptance with its per-author signatures.
    ///
    /// Every signature is verified against the signing path derived from
    /// the copayer's xpub before anything is applied; a single mismatch
    /// fails the whole call.
    pub async fn sign_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        proposal_id: &str,
        signatures: BTreeMap<String, String>,
    ) -> Result<TxProposal, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let mut tx = self
                    .storage
                    .fetch_tx(wallet_id, proposal_id)
                    .ok_or(ServiceError::TxNotFound)?;
                if tx.status != ProposalStatus::Pending {
                    return Err(ServiceError::TxNotPending);
                }
                if tx.action_by(copayer_id).is_some() {
                    return Err(ServiceError::CopayerVoted);
                }

                let wallet = self.storage.fetch_wallet(wallet_id)?;
                let copayer = wallet
                    .copayer(copayer_id)
                    .ok_or(ServiceError::CopayerNotFound)?;

                verify_action_signatures(&tx, &copayer.xpub, &signatures)?;

                tx.actions.push(ProposalAction {
                    copayer_id: copayer_id.to_string(),
                    kind: ActionKind::Accept,
                    signatures: Some(signatures),
                    xpub: copayer.xpub.clone(),
                    comment: None,
                    created_on: Utc::now(),
                });
                self.notify(
                    wallet_id,
                    kinds::TX_PROPOSAL_ACCEPTED_BY,
                    Some(copayer_id),
                    serde_json::json!({ "txProposalId": tx.id }),
                );

                if tx.accept_count() >= tx.required_signatures {
                    let joint = compose::finalize_joint(&tx)?;
                    let txid = joint
                        .unit
                        .unit
                        .clone()
                        .ok_or_else(|| ServiceError::Internal("finalized joint lacks hash".into()))?;
                    tx.joint = joint;
                    tx.txid = Some(txid.clone());
                    tx.status = ProposalStatus::Accepted;
                    self.notify(
                        wallet_id,
                        kinds::TX_PROPOSAL_FINALLY_ACCEPTED,
                        None,
                        serde_json::json!({ "txProposalId": tx.id, "txid": txid }),
                    );
                }

                self.storage.store_tx(&tx);
                Ok(tx)
            })
            .await
    }

    /// Record a rejection; finalises once `required_rejections` is reached.
    pub async fn reject_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        proposal_id: &str,
        reason: Option<String>,
    ) -> Result<TxProposal, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let mut tx = self
                    .storage
                    .fetch_tx(wallet_id, proposal_id)
                    .ok_or(ServiceError::TxNotFound)?;
                if tx.status != ProposalStatus::Pending {
                    return Err(ServiceError::TxNotPending);
                }
                if tx.action_by(copayer_id).is_some() {
                    return Err(ServiceError::CopayerVoted);
                }

                let wallet = self.storage.fetch_wallet(wallet_id)?;
                let copayer = wallet
                    .copayer(copayer_id)
                    .ok_or(ServiceError::CopayerNotFound)?;

                tx.actions.push(ProposalAction {
                    copayer_id: copayer_id.to_string(),
                    kind: ActionKind::Reject,
                    signatures: None,
                    xpub: copayer.xpub.clone(),
                    comment: reason,
                    created_on: Utc::now(),
                });
                self.notify(
                    wallet_id,
                    kinds::TX_PROPOSAL_REJECTED_BY,
                    Some(copayer_id),
                    serde_json::json!({ "txProposalId": tx.id }),
                );

                if tx.reject_count() >= tx.required_rejections {
                    tx.status = ProposalStatus::Rejected;
                    self.notify(
                        wallet_id,
                        kinds::TX_PROPOSAL_FINALLY_REJECTED,
                        None,
                        serde_json::json!({ "txProposalId": tx.id }),
                    );
                }

                self.storage.store_tx(&tx);
                Ok(tx)
            })
            .await
    }

    /// Submit an accepted proposal's joint to the hub.
    ///
    /// A hub failure is rechecked against the explorer: when the unit is
    /// already in the ledger the proposal is treated as broadcast by a
    /// third party. A genuine failure keeps the proposal `accepted` with
    /// its txid retained.
    pub async fn broadcast_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        proposal_id: &str,
    ) -> Result<TxProposal, ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let mut tx = self
                    .storage
                    .fetch_tx(wallet_id, proposal_id)
                    .ok_or(ServiceError::TxNotFound)?;
                match tx.status {
                    ProposalStatus::Broadcasted => return Err(ServiceError::TxAlreadyBroadcasted),
                    ProposalStatus::Accepted => {}
                    _ => return Err(ServiceError::TxNotAccepted),
                }
                let txid = tx
                    .txid
                    .clone()
                    .ok_or_else(|| ServiceError::Internal("accepted proposal lacks txid".into()))?;

                let (kind, data) = match self.hub.broadcast_joint(&tx.joint).await {
                    Ok(unit) => {
                        log::info!("wallet {} broadcast unit {}", wallet_id, unit);
                        (kinds::NEW_OUTGOING_TX, serde_json::json!({ "txid": txid }))
                    }
                    Err(hub_error) => {
                        // The hub may have accepted the unit on an earlier
                        // attempt, or another party may have broadcast it.
                        match self.explorer.get_transaction(&txid).await {
                            Ok(Some(_)) => {
                                log::info!(
                                    "wallet {} unit {} already in ledger, treating as third-party broadcast",
                                    wallet_id,
                                    txid
                                );
                                (
                                    kinds::NEW_OUTGOING_TX_BY_THIRD_PARTY,
                                    serde_json::json!({ "txid": txid }),
                                )
                            }
                            _ => return Err(hub_error),
                        }
                    }
                };

                tx.status = ProposalStatus::Broadcasted;
                tx.broadcasted_on = Some(Utc::now());
                self.storage.store_tx(&tx);
                self.storage.log_broadcast(&BroadcastLogEntry {
                    wallet_id: wallet_id.to_string(),
                    txid: txid.clone(),
                    inputs: tx.inputs.clone(),
                    broadcasted_on: Utc::now(),
                });
                self.notify(wallet_id, kind, Some(copayer_id), data);
                Ok(tx)
            })
            .await
    }

    /// Remove a proposal. The creator may remove immediately while nobody
    /// else has acted; after a foreign action a `delete_locktime` cooldown
    /// applies before anyone may remove it.
    pub async fn remove_tx(
        &self,
        copayer_id: &str,
        wallet_id: &str,
        proposal_id: &str,
    ) -> Result<(), ServiceError> {
        self.locks
            .run_locked_default(wallet_id, || async {
                let tx = self
                    .storage
                    .fetch_tx(wallet_id, proposal_id)
                    .ok_or(ServiceError::TxNotFound)?;
                if !tx.is_pending() {
                    return Err(ServiceError::TxCannotRemove(
                        "proposal has already been finalized".to_string(),
                    ));
                }

                match tx.last_foreign_action() {
                    None => {
                        if tx.creator_id != copayer_id {
                            return Err(ServiceError::TxCannotRemove(
                                "only the creator can remove a pending proposal".to_string(),
                            ));
                        }
                    }
                    Some(action) => {
                        let deadline =
                            action.created_on + Duration::seconds(self.config.delete_locktime);
                        if Utc::now() < deadline {
                            return Err(ServiceError::TxCannotRemove(format!(
                                "cannot remove until {}",
                                deadline.to_rfc3339()
                            )));
                        }
                    }
                }

                self.storage.remove_tx(wallet_id, proposal_id);
                self.notify(
                    wallet_id,
                    kinds::TX_PROPOSAL_REMOVED,
                    Some(copayer_id),
                    serde_json::json!({ "txProposalId": proposal_id }),
                );
                Ok(())
            })
            .await
    }

    pub fn get_tx(&self, wallet_id: &str, proposal_id: &str) -> Result<TxProposal, ServiceError> {
        self.storage
            .fetch_tx(wallet_id, proposal_id)
            .ok_or(ServiceError::TxNotFound)
    }

    pub fn get_txs(&self, wallet_id: &str, filter: &TxFilter) -> Result<Vec<TxProposal>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        Ok(self.storage.fetch_txs(wallet_id, filter))
    }

    pub fn get_pending_txs(&self, wallet_id: &str) -> Result<Vec<TxProposal>, ServiceError> {
        self.storage.fetch_wallet(wallet_id)?;
        Ok(self.storage.fetch_pending_txs(wallet_id))
    }
}

/// Verify a full set of accept signatures against the proposal's signing
/// info before any state changes.
fn verify_action_signatures(
    tx: &TxProposal,
    xpub: &str,
    signatures: &BTreeMap<String, String>,
) -> Result<(), ServiceError> {
    let digest = compose::unit_digest(&tx.joint.unit)?;

    for (author_address, info) in &tx.signing_info {
        let signature = signatures
            .get(author_address)
            .ok_or(ServiceError::BadSignatures)?;

        let (change, index) = parse_path(&info.path)?;
        let copayer_pubkey = derivation::derive_pubkey(xpub, change, index)?;
        if !info.signing_paths.contains_key(&copayer_pubkey) {
            return Err(ServiceError::BadSignatures);
        }
        sigs::verify_digest_signature(&copayer_pubkey, digest, signature)
            .map_err(|_| ServiceError::BadSignatures)?;
    }
    Ok(())
}

fn parse_path(path: &str) -> Result<(u32, u32), ServiceError> {
    let parse = || {
        let mut parts = path.strip_prefix("m/")?.split('/');
        let change = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        Some((change, index))
    };
    parse().ok_or_else(|| ServiceError::Internal(format!("malformed derivation path {}", path)))
}

fn validate_app_params(
    app: TxApp,
    params: &serde_json::Value,
    outputs: &[Output],
) -> Result<(), ServiceError> {
    match app {
        TxApp::Payment => {
            if outputs.is_empty() {
                return Err(ServiceError::BadRequest("payment requires outputs".to_string()));
            }
            for output in outputs {
                if !derivation::is_valid_address(&output.address) {
                    return Err(ServiceError::InvalidAddress(output.address.clone()));
                }
                if output.amount == 0 || output.amount > compose::MAX_TOTAL_SUPPLY {
                    return Err(ServiceError::BadRequest(format!(
                        "invalid output amount {}",
                        output.amount
                    )));
                }
            }
            Ok(())
        }
        TxApp::Data | TxApp::Profile | TxApp::Attestation | TxApp::Asset => params
            .is_object()
            .then_some(())
            .ok_or_else(|| ServiceError::BadRequest(format!("{} payload must be an object", app.as_str()))),
        TxApp::Text => params
            .is_string()
            .then_some(())
            .ok_or_else(|| ServiceError::BadRequest("text payload must be a string".to_string())),
        TxApp::Poll => {
            let ok = params.get("question").map_or(false, |q| q.is_string())
                && params
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .map_or(false, |c| !c.is_empty());
            ok.then_some(())
                .ok_or_else(|| ServiceError::BadRequest("poll requires question and choices".to_string()))
        }
        TxApp::Vote => {
            let ok = params.get("unit").map_or(false, |u| u.is_string())
                && params.get("choice").map_or(false, |c| c.is_string());
            ok.then_some(())
                .ok_or_else(|| ServiceError::BadRequest("vote requires unit and choice".to_string()))
        }
        TxApp::DataFeed => {
            let ok = params.as_object().map_or(false, |o| !o.is_empty());
            ok.then_some(())
                .ok_or_else(|| ServiceError::BadRequest("data_feed payload must be a non-empty object".to_string()))
        }
        TxApp::AssetAttestors => {
            let ok = params.get("asset").map_or(false, |a| a.is_string())
                && params
                    .get("attestors")
                    .and_then(|a| a.as_array())
                    .map_or(false, |a| !a.is_empty());
            ok.then_some(())
                .ok_or_else(|| ServiceError::BadRequest("asset_attestors requires asset and attestors".to_string()))
        }
        TxApp::AddressDefinitionChange => {
            let ok = params.get("definition_chash").map_or(false, |d| d.is_string());
            ok.then_some(()).ok_or_else(|| {
                ServiceError::BadRequest("address_definition_change requires definition_chash".to_string())
            })
        }
        TxApp::DefinitionTemplate => params
            .is_array()
            .then_some(())
            .ok_or_else(|| ServiceError::BadRequest("definition_template payload must be an array".to_string())),
    }
}
