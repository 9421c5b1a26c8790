//! Commit-to-changelist reconciliation.

pub mod engine;
pub mod ledger;
pub mod reuse;

pub use engine::{classify, Reconciler, RunState, REVERT_SCOPE};
pub use ledger::{Holder, OpenFileLedger};
pub use reuse::ReuseIndex;
