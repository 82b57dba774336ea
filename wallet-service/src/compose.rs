//! Draft-joint composition
//!
//! Builds the raw ledger unit for a proposal: selects inputs from the
//! wallet's live UTXOs, computes size-based commissions, inlines the
//! app payload and leaves signature placeholders in the authentifiers.

use std::collections::BTreeMap;

use base64::Engine;

use crate::error::ServiceError;
use crate::model::{Address, Output, SigningInfo, TxApp, TxProposal, UtxoRef, Wallet};
use crate::ledger::types::{Author, Joint, Message, Unit, UtxoRecord, UNIT_ALT, UNIT_VERSION};
use crate::sigs::sha256_digest;

/// Total issuance of the base asset; payment amounts must stay below it.
pub const MAX_TOTAL_SUPPLY: u64 = 1_000_000_000_000_000;

/// Placeholder standing in for a 88-character base64 signature when sizing
/// the unit.
const SIG_PLACEHOLDER: &str = "----------------------------------------------------------------------------------------";

#[derive(Debug, Clone)]
pub struct ComposedJoint {
    pub joint: Joint,
    pub inputs: Vec<UtxoRef>,
    pub signing_info: BTreeMap<String, SigningInfo>,
    pub change_amount: u64,
}

/// Canonical serialisation used for all unit hashing: serde_json with
/// lexicographically ordered object keys.
pub fn canonical_json<T: serde::Serialize>(value: &T) -> Result<String, ServiceError> {
    let value = serde_json::to_value(value).map_err(|e| ServiceError::Internal(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| ServiceError::Internal(e.to_string()))
}

/// Digest of the naked unit (no authentifiers, no hash field); both the
/// unit hash and every authentifier signature are computed over it.
pub fn unit_digest(unit: &Unit) -> Result<[u8; 32], ServiceError> {
    let mut naked = unit.clone();
    naked.unit = None;
    for author in &mut naked.authors {
        author.authentifiers.clear();
    }
    Ok(sha256_digest(canonical_json(&naked)?.as_bytes()))
}

/// The ledger transaction id: base64 of the naked-unit digest.
pub fn unit_hash(unit: &Unit) -> Result<String, ServiceError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(unit_digest(unit)?))
}

pub fn payload_hash(payload: &serde_json::Value) -> Result<String, ServiceError> {
    let canonical = canonical_json(payload)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(sha256_digest(canonical.as_bytes())))
}

/// Compose a draft joint paying `outputs` (possibly empty for non-payment
/// apps) from the wallet's available UTXOs.
///
/// Inputs are selected stable-first, largest-first, until they cover the
/// target amount plus commissions; commissions are recomputed as the unit
/// grows. A change output is appended when the selection overshoots.
pub fn compose_joint(
    wallet: &Wallet,
    paying_addresses: &[Address],
    available_utxos: &[UtxoRecord],
    app: TxApp,
    params: &serde_json::Value,
    outputs: &[Output],
    change_address: Option<&Address>,
) -> Result<ComposedJoint, ServiceError> {
    let address_by_id: BTreeMap<&str, &Address> =
        paying_addresses.iter().map(|a| (a.address.as_str(), a)).collect();

    let mut candidates: Vec<&UtxoRecord> = available_utxos
        .iter()
        .filter(|u| u.asset.is_none() && address_by_id.contains_key(u.address.as_str()))
        .collect();
    // Stable first, then largest first, so pending change is spent last.
    candidates.sort_by(|a, b| b.stable.cmp(&a.stable).then(b.amount.cmp(&a.amount)));

    let target: u64 = outputs.iter().map(|o| o.amount).sum();

    let mut selected: Vec<&UtxoRecord> = Vec::new();
    let mut total_in: u64 = 0;
    let mut candidate_iter = candidates.into_iter();

    loop {
        let unit = build_unit(app, params, outputs, &selected, change_address, 0)?;
        let commission = unit.headers_commission + unit.payload_commission;

        if total_in >= target + commission {
            let change = total_in - target - commission;
            // Re-size with the change output in place; its own bytes raise
            // the commission, so settle the final change amount against the
            // grown unit.
            let sized = build_unit(app, params, outputs, &selected, change_address, change)?;
            let final_commission = sized.headers_commission + sized.payload_commission;
            if total_in >= target + final_commission {
                let final_change = total_in - target - final_commission;
                let unit =
                    build_unit(app, params, outputs, &selected, change_address, final_change)?;
                let inputs = selected
                    .iter()
                    .map(|u| UtxoRef {
                        unit: u.unit.clone(),
                        message_index: u.message_index,
                        output_index: u.output_index,
                    })
                    .collect();
                let signing_info =
                    build_signing_info(wallet, &unit, &address_by_id)?;
                return Ok(ComposedJoint {
                    joint: Joint { unit },
                    inputs,
                    signing_info,
                    change_amount: final_change,
                });
            }
        }

        match candidate_iter.next() {
            Some(utxo) => {
                total_in += utxo.amount;
                selected.push(utxo);
            }
            None => {
                return Err(ServiceError::TxCannotCreate(
                    "insufficient funds to cover outputs and commissions".to_string(),
                ))
            }
        }
    }
}

fn build_unit(
    app: TxApp,
    params: &serde_json::Value,
    outputs: &[Output],
    selected: &[&UtxoRecord],
    change_address: Option<&Address>,
    change_amount: u64,
) -> Result<Unit, ServiceError> {
    let mut messages = Vec::new();

    if app == TxApp::Payment || !selected.is_empty() {
        let payment = payment_payload(outputs, selected, change_address, change_amount);
        messages.push(Message {
            app: "payment".to_string(),
            payload_location: "inline".to_string(),
            payload_hash: payload_hash(&payment)?,
            payload: Some(payment),
        });
    }

    if app != TxApp::Payment {
        messages.push(Message {
            app: app.as_str().to_string(),
            payload_location: "inline".to_string(),
            payload_hash: payload_hash(params)?,
            payload: Some(params.clone()),
        });
    }

    let mut author_addresses: Vec<&str> =
        selected.iter().map(|u| u.address.as_str()).collect();
    author_addresses.sort_unstable();
    author_addresses.dedup();

    let authors = author_addresses
        .iter()
        .map(|address| Author {
            address: address.to_string(),
            // Sized with a placeholder per future signature slot; the real
            // authentifiers replace it at acceptance.
            authentifiers: BTreeMap::from([("r".to_string(), SIG_PLACEHOLDER.to_string())]),
            definition: None,
        })
        .collect();

    let mut unit = Unit {
        version: UNIT_VERSION.to_string(),
        alt: UNIT_ALT.to_string(),
        authors,
        messages,
        parent_units: Vec::new(),
        last_ball: None,
        last_ball_unit: None,
        headers_commission: 0,
        payload_commission: 0,
        timestamp: None,
        unit: None,
    };

    let payload_commission = canonical_json(&unit.messages)?.len() as u64;
    let headers_commission = canonical_json(&unit)?
        .len()
        .saturating_sub(payload_commission as usize) as u64;
    unit.headers_commission = headers_commission;
    unit.payload_commission = payload_commission;
    Ok(unit)
}

fn payment_payload(
    outputs: &[Output],
    selected: &[&UtxoRecord],
    change_address: Option<&Address>,
    change_amount: u64,
) -> serde_json::Value {
    let mut inputs: Vec<&&UtxoRecord> = selected.iter().collect();
    inputs.sort_by(|a, b| {
        (&a.unit, a.message_index, a.output_index).cmp(&(&b.unit, b.message_index, b.output_index))
    });
    let inputs: Vec<serde_json::Value> = inputs
        .iter()
        .map(|u| {
            serde_json::json!({
                "unit": u.unit,
                "message_index": u.message_index,
                "output_index": u.output_index,
            })
        })
        .collect();

    let mut all_outputs: Vec<(String, u64)> =
        outputs.iter().map(|o| (o.address.clone(), o.amount)).collect();
    if change_amount > 0 {
        if let Some(change) = change_address {
            all_outputs.push((change.address.clone(), change_amount));
        }
    }
    all_outputs.sort();
    let outputs: Vec<serde_json::Value> = all_outputs
        .iter()
        .map(|(address, amount)| serde_json::json!({ "address": address, "amount": amount }))
        .collect();

    serde_json::json!({ "inputs": inputs, "outputs": outputs })
}

fn build_signing_info(
    wallet: &Wallet,
    unit: &Unit,
    address_by_id: &BTreeMap<&str, &Address>,
) -> Result<BTreeMap<String, SigningInfo>, ServiceError> {
    let mut signing_info = BTreeMap::new();
    for author in &unit.authors {
        let address = address_by_id
            .get(author.address.as_str())
            .ok_or(ServiceError::AddressNotFound)?;
        signing_info.insert(
            author.address.clone(),
            SigningInfo {
                wallet_id: wallet.id.clone(),
                path: address.path.clone(),
                signing_paths: address.signing_paths.clone(),
            },
        );
    }
    Ok(signing_info)
}

/// Inject the collected accept-action signatures into the draft joint and
/// seal it with its unit hash.
pub fn finalize_joint(proposal: &TxProposal) -> Result<Joint, ServiceError> {
    let mut joint = proposal.joint.clone();

    for author in &mut joint.unit.authors {
        let info = proposal
            .signing_info
            .get(&author.address)
            .ok_or(ServiceError::AddressNotFound)?;
        author.authentifiers.clear();
        for action in &proposal.actions {
            let Some(signatures) = &action.signatures else { continue };
            let Some(signature) = signatures.get(&author.address) else { continue };
            // Locate this copayer's slot within the address definition.
            let copayer_pubkey = crate::derivation::derive_pubkey(
                &action.xpub,
                path_change(&info.path),
                path_index(&info.path),
            )?;
            if let Some(signing_path) = info.signing_paths.get(&copayer_pubkey) {
                author
                    .authentifiers
                    .insert(signing_path.clone(), signature.clone());
            }
        }
    }

    let hash = unit_hash(&joint.unit)?;
    joint.unit.unit = Some(hash);
    Ok(joint)
}

fn path_change(path: &str) -> u32 {
    path.strip_prefix("m/")
        .and_then(|p| p.split('/').next())
        .and_then(|c| c.parse().ok())
        .unwrap_or(0)
}

fn path_index(path: &str) -> u32 {
    path.strip_prefix("m/")
        .and_then(|p| p.split('/').nth(1))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(unit: &str, address: &str, amount: u64, stable: bool) -> UtxoRecord {
        UtxoRecord {
            unit: unit.to_string(),
            message_index: 0,
            output_index: 0,
            address: address.to_string(),
            amount,
            asset: None,
            denomination: 1,
            stable,
            time: None,
        }
    }

    #[test]
    fn unit_hash_ignores_authentifiers() {
        let mut unit = Unit {
            version: UNIT_VERSION.to_string(),
            alt: UNIT_ALT.to_string(),
            authors: vec![Author {
                address: "ADDRESS".to_string(),
                authentifiers: BTreeMap::new(),
                definition: None,
            }],
            messages: vec![],
            parent_units: vec![],
            last_ball: None,
            last_ball_unit: None,
            headers_commission: 100,
            payload_commission: 50,
            timestamp: None,
            unit: None,
        };
        let bare = unit_hash(&unit).unwrap();
        unit.authors[0]
            .authentifiers
            .insert("r".to_string(), "sig".to_string());
        unit.unit = Some(bare.clone());
        assert_eq!(unit_hash(&unit).unwrap(), bare);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v = serde_json::json!({"b": 1, "a": 2});
        assert_eq!(canonical_json(&v).unwrap(), "{\"a\":2,\"b\":1}");
    }

    #[test]
    fn selection_prefers_stable_and_large() {
        let utxos = vec![
            utxo("u1", "PAY", 500, false),
            utxo("u2", "PAY", 400_000, true),
            utxo("u3", "PAY", 300, true),
        ];
        let mut candidates: Vec<&UtxoRecord> = utxos.iter().collect();
        candidates.sort_by(|a, b| b.stable.cmp(&a.stable).then(b.amount.cmp(&a.amount)));
        assert_eq!(candidates[0].unit, "u2");
        assert_eq!(candidates[1].unit, "u3");
        assert_eq!(candidates[2].unit, "u1");
    }
}
