//! Error types for the git4p4 core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. Errors
//! from the gateways convert into the reconcile and session errors with
//! `?`.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the local Git repository (the source side).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The repository is bare; there are no files to mirror.
    #[error("git repository at '{0}' has no working directory")]
    NoWorkdir(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),
}

// ---------------------------------------------------------------------------
// Perforce errors
// ---------------------------------------------------------------------------

/// Errors from `p4` CLI operations (the target side).
#[derive(Debug, Error)]
pub enum P4Error {
    /// The `p4` binary was not found on `$PATH`.
    #[error("p4 binary not found: {0}")]
    BinaryNotFound(String),

    /// A `p4` command exited with a non-zero status, or reported a failure
    /// record.
    #[error("p4 command failed (exit {exit_code}): {message}")]
    CommandFailed { exit_code: i32, message: String },

    /// No record with the expected `code` tag was present in the output.
    #[error("no '{code}' record in p4 output")]
    EntryNotFound { code: String },

    /// A record was present but lacked a required field.
    #[error("p4 '{code}' record is missing field '{field}'")]
    MissingField { code: String, field: String },

    /// The marshalled record stream could not be decoded.
    #[error("malformed p4 output: {0}")]
    MalformedOutput(String),

    /// A confirmation message did not have the expected shape.
    #[error("unexpected p4 confirmation: {0}")]
    UnexpectedConfirmation(String),

    /// Generic I/O wrapper.
    #[error("p4 I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl P4Error {
    /// Whether this error only says that an expected record was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Fatal conditions that stop a reconciliation run at a commit boundary.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A pending changelist shares the commit's description but holds files
    /// the commit does not touch.
    #[error(
        "changelist {changelist} has the same description as commit {revision} but holds other files: {}",
        display_paths(.unexpected)
    )]
    ReuseMismatch {
        changelist: String,
        revision: String,
        unexpected: Vec<PathBuf>,
    },

    /// Files touched by the commit are already open in another pending
    /// changelist.
    #[error(
        "commit {revision} touches files already open in a pending changelist: {}",
        display_paths(.paths)
    )]
    OpenElsewhere {
        revision: String,
        paths: Vec<PathBuf>,
    },

    /// The source reported a change status we do not know how to mirror.
    #[error("unsupported status '{status}' for file: {}", .path.display())]
    UnsupportedChange { path: PathBuf, status: char },

    /// A renamed file has no depot counterpart.
    #[error("no depot file found for rename source: {}", .path.display())]
    MissingDepotMapping { path: PathBuf },

    /// Underlying Git error while reconciling.
    #[error("reconcile Git error: {0}")]
    Git(#[from] GitError),

    /// Underlying Perforce error while reconciling.
    #[error("reconcile p4 error: {0}")]
    P4(#[from] P4Error),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors raised by the session controller outside of the per-commit loop.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Local modifications would be lost by checking out other commits.
    #[error("git working copy has local changes")]
    DirtyWorkingCopy,

    /// The commit range argument cannot be handed to the source.
    #[error("invalid commit range '{0}': only FROM..TO is supported")]
    InvalidRange(String),

    /// Underlying Git error.
    #[error("session Git error: {0}")]
    Git(#[from] GitError),

    /// Underlying Perforce error.
    #[error("session p4 error: {0}")]
    P4(#[from] P4Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
