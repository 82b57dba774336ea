//! Persistent document models
//!
//! One struct per stored collection, mongo-compatible serde shapes.

pub mod address;
pub mod notification;
pub mod proposal;
pub mod session;
pub mod support;
pub mod wallet;

pub use address::Address;
pub use notification::Notification;
pub use proposal::{ActionKind, Output, ProposalAction, ProposalStatus, SigningInfo, TxApp, TxProposal, UtxoRef};
pub use session::Session;
pub use support::{Asset, BroadcastLogEntry, FiatRate, Preferences, PushSub, TxConfirmationSub, TxNote};
pub use wallet::{AddressType, Copayer, CopayerLookup, DerivationStrategy, Network, RequestKey, ScanStatus, Wallet, WalletStatus};
