//! Epoch accounting: deposits, harvests, and the persisted pool ledger.

pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use service::{AuditEntry, Clock, ManualClock, SystemClock, VaultError, VaultService};
