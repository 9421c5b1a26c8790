//! Git operations for git4p4.

pub mod client;

pub use client::GitClient;
