//! Ledger access seams
//!
//! The explorer is read-authoritative for UTXOs, balances, history and
//! address activity; the hub is write-authoritative for broadcast. Both are
//! traits so tests and the explorer-mock can stand in for the real node.

pub mod explorer;
pub mod hub;
pub mod types;

pub use explorer::{Explorer, HttpExplorer};
pub use hub::{HttpHub, Hub};
