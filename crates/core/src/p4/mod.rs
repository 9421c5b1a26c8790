//! Perforce CLI wrapper for git4p4.

pub mod client;
pub mod marshal;
pub mod record;

pub use client::P4Client;
pub use record::{Record, RecordCode, RecordSet};
