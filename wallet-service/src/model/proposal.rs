use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::types::Joint;

use super::address::Address;

/// The application kind a proposal carries. `Payment` moves value and drives
/// input selection; all other kinds inline their payload and only pay fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxApp {
    Payment,
    Data,
    Text,
    Profile,
    Poll,
    Vote,
    DataFeed,
    Attestation,
    Asset,
    AssetAttestors,
    AddressDefinitionChange,
    DefinitionTemplate,
}

impl TxApp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxApp::Payment => "payment",
            TxApp::Data => "data",
            TxApp::Text => "text",
            TxApp::Profile => "profile",
            TxApp::Poll => "poll",
            TxApp::Vote => "vote",
            TxApp::DataFeed => "data_feed",
            TxApp::Attestation => "attestation",
            TxApp::Asset => "asset",
            TxApp::AssetAttestors => "asset_attestors",
            TxApp::AddressDefinitionChange => "address_definition_change",
            TxApp::DefinitionTemplate => "definition_template",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Temporary,
    Pending,
    Accepted,
    Rejected,
    Broadcasted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub address: String,
    pub amount: u64,
}

/// Reference to an unspent output on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoRef {
    pub unit: String,
    pub message_index: u32,
    pub output_index: u32,
}

impl std::fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.unit, self.message_index, self.output_index)
    }
}

/// How to sign for one author address of the draft joint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningInfo {
    pub wallet_id: String,
    /// Derivation path of the author address.
    pub path: String,
    /// Derived pubkey (hex) to signing path within the address definition.
    pub signing_paths: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalAction {
    pub copayer_id: String,
    pub kind: ActionKind,
    /// Author address to base64 signature over the unit hash (accepts only).
    pub signatures: Option<BTreeMap<String, String>>,
    pub xpub: String,
    pub comment: Option<String>,
    pub created_on: DateTime<Utc>,
}

/// A transaction proposal moving through the coordination life cycle:
///
/// ```text
/// temporary -> pending -> accepted -> broadcasted (-> stable flag)
///                 `-> rejected
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxProposal {
    pub id: String,
    pub wallet_id: String,
    pub creator_id: String,
    pub app: TxApp,
    /// App-specific parameters, validated at the edge.
    pub params: serde_json::Value,
    pub outputs: Vec<Output>,
    pub change_address: Option<Address>,
    /// Draft joint; authentifiers carry placeholders until acceptance.
    pub joint: Joint,
    pub inputs: Vec<UtxoRef>,
    /// Author address to signing instructions.
    pub signing_info: BTreeMap<String, SigningInfo>,
    pub required_signatures: usize,
    pub required_rejections: usize,
    pub status: ProposalStatus,
    pub actions: Vec<ProposalAction>,
    /// Ledger unit hash, computed when the proposal reaches `accepted`.
    pub txid: Option<String>,
    /// Signature by the creator over the draft-joint hash, set on publish.
    pub proposal_signature: Option<String>,
    pub broadcasted_on: Option<DateTime<Utc>>,
    pub is_stable: bool,
    pub stabilized_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

impl TxProposal {
    pub fn action_by(&self, copayer_id: &str) -> Option<&ProposalAction> {
        self.actions.iter().find(|a| a.copayer_id == copayer_id)
    }

    pub fn accept_count(&self) -> usize {
        self.actions.iter().filter(|a| a.kind == ActionKind::Accept).count()
    }

    pub fn reject_count(&self) -> usize {
        self.actions.iter().filter(|a| a.kind == ActionKind::Reject).count()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, ProposalStatus::Temporary | ProposalStatus::Pending)
    }

    /// Last action by a copayer other than the creator, if any.
    pub fn last_foreign_action(&self) -> Option<&ProposalAction> {
        self.actions
            .iter()
            .filter(|a| a.copayer_id != self.creator_id)
            .max_by_key(|a| a.created_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_kind_wire_names() {
        assert_eq!(TxApp::DataFeed.as_str(), "data_feed");
        assert_eq!(
            serde_json::to_string(&TxApp::AddressDefinitionChange).unwrap(),
            "\"address_definition_change\""
        );
    }

    #[test]
    fn utxo_ref_display() {
        let r = UtxoRef { unit: "abc".into(), message_index: 0, output_index: 2 };
        assert_eq!(r.to_string(), "abc:0:2");
    }
}
