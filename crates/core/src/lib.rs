//! git4p4 core library.
//!
//! Mirrors local Git commits into pending Perforce changelists: one
//! changelist per commit, matched by description so that re-runs pick up
//! where earlier ones left off. This crate holds the configuration, the two
//! repository gateways, the reconciliation engine and the session that
//! drives it.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod git;
pub mod models;
pub mod p4;
pub mod reconcile;
pub mod session;

// Re-exports for convenience.
pub use config::Git4p4Config;
pub use gateway::{SourceRepository, TargetRepository};
pub use git::GitClient;
pub use p4::P4Client;
pub use reconcile::Reconciler;
pub use session::{Session, SessionReport};
