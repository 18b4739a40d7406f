//! Usage accounting
//!
//! Applies the tokens of each exchange to the system, provider, model, key and
//! user aggregates.

pub mod ledger;

pub use ledger::{LedgerTarget, UsageLedger};
