use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record of a wallet's append-only notification log.
///
/// `id` is assigned by storage and strictly increases within a wallet;
/// `ticker` is a per-process counter that breaks ties between records
/// created in the same millisecond.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub ticker: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub wallet_id: String,
    pub creator_id: Option<String>,
    pub data: serde_json::Value,
    pub created_on: DateTime<Utc>,
}

/// Notification type tags used across the service.
pub mod kinds {
    pub const NEW_COPAYER: &str = "NewCopayer";
    pub const WALLET_COMPLETE: &str = "WalletComplete";
    pub const NEW_ADDRESS: &str = "NewAddress";
    pub const NEW_TX_PROPOSAL: &str = "NewTxProposal";
    pub const TX_PROPOSAL_ACCEPTED_BY: &str = "TxProposalAcceptedBy";
    pub const TX_PROPOSAL_REJECTED_BY: &str = "TxProposalRejectedBy";
    pub const TX_PROPOSAL_FINALLY_ACCEPTED: &str = "TxProposalFinallyAccepted";
    pub const TX_PROPOSAL_FINALLY_REJECTED: &str = "TxProposalFinallyRejected";
    pub const TX_PROPOSAL_REMOVED: &str = "TxProposalRemoved";
    pub const NEW_OUTGOING_TX: &str = "NewOutgoingTx";
    pub const NEW_OUTGOING_TX_BY_THIRD_PARTY: &str = "NewOutgoingTxByThirdParty";
    pub const NEW_INCOMING_TX: &str = "NewIncomingTx";
    pub const TX_CONFIRMATION: &str = "TxConfirmation";
    pub const SCAN_FINISHED: &str = "ScanFinished";
}
