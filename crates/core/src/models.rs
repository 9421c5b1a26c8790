//! Domain model types used throughout git4p4.
//!
//! These types bridge the two repository gateways, the reconciliation
//! engine, and the session controller.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ReconcileError;

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// Kind of change a commit made to one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Add,
    Modify,
    Delete,
    /// Moved from `from` to the change's `path`.
    Rename { from: PathBuf },
    /// Any status git reports that has no Perforce counterpart here
    /// (copies, type changes, ...). Carries git's one-letter status code.
    Unsupported(char),
}

impl FileChangeKind {
    /// One-letter status code, as printed by `git diff-tree --name-status`.
    pub fn code(&self) -> char {
        match self {
            Self::Add => 'A',
            Self::Modify => 'M',
            Self::Delete => 'D',
            Self::Rename { .. } => 'R',
            Self::Unsupported(code) => *code,
        }
    }
}

/// A single file touched by a commit. `path` is absolute, in the local
/// filesystem namespace shared by the Git and Perforce workspaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: FileChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::new(to, FileChangeKind::Rename { from: from.into() })
    }

    /// Pre-rename path, for renames only.
    pub fn renamed_from(&self) -> Option<&PathBuf> {
        match &self.kind {
            FileChangeKind::Rename { from } => Some(from),
            _ => None,
        }
    }
}

/// A source commit, read once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub revision: String,
    pub message: String,
    pub changes: Vec<FileChange>,
}

impl Commit {
    /// First line of the message, for logs.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    /// The key used to match this commit against pending changelist
    /// descriptions.
    pub fn reuse_key(&self) -> &str {
        self.message.trim()
    }

    /// Destination paths plus rename source paths, in diff order.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.changes.iter().map(|c| c.path.clone()).collect();
        paths.extend(self.changes.iter().filter_map(|c| c.renamed_from().cloned()));
        let mut seen = BTreeSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }
}

/// Where the source working copy was before the run touched it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPosition {
    /// HEAD commit hash.
    pub head: String,
    /// Checked-out branch, `None` when HEAD is detached.
    pub branch: Option<String>,
}

impl RunPosition {
    /// The ref to check out to get back here: the branch when there is one.
    pub fn restore_ref(&self) -> &str {
        self.branch.as_deref().unwrap_or(&self.head)
    }
}

// ---------------------------------------------------------------------------
// Target side
// ---------------------------------------------------------------------------

/// A Perforce changelist number (or `default`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChangelistId(pub String);

impl ChangelistId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, used to order changelists; `None` for `default`.
    pub fn number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ChangelistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User and client the run creates changelists for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub user: String,
    pub client: String,
}

/// The form submitted to `p4 change -i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelistSpec {
    pub client: String,
    pub user: String,
    pub description: String,
}

/// A pending changelist as listed by `p4 changes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChangelist {
    pub id: ChangelistId,
    pub description: String,
}

/// A file currently open on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub depot_path: String,
    pub changelist: ChangelistId,
}

/// One depot path mapped to its local filesystem location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub depot_path: String,
    pub local_path: PathBuf,
}

/// Verbs used to open files on the target side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    Add,
    Edit,
    Delete,
}

impl OpenAction {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

// ---------------------------------------------------------------------------
// Run policy and results
// ---------------------------------------------------------------------------

/// Knobs that change what a run does, resolved from config and CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPolicy {
    pub dry_run: bool,
    pub shelve: bool,
    /// Only meaningful together with `shelve`.
    pub revert: bool,
    pub ignore_opened: bool,
    pub stay: bool,
    pub manage_tracking_branch: bool,
    pub tracking_branch: String,
    pub rename_threshold: Option<u16>,
}

impl RunPolicy {
    pub fn reverts(&self) -> bool {
        self.shelve && self.revert
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            dry_run: false,
            shelve: true,
            revert: true,
            ignore_opened: false,
            stay: false,
            manage_tracking_branch: true,
            tracking_branch: "p4".into(),
            rename_threshold: None,
        }
    }
}

/// A commit's changes partitioned by the verb used to open them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSets {
    pub add: Vec<PathBuf>,
    pub edit: Vec<PathBuf>,
    pub delete: Vec<PathBuf>,
    /// `(from, to)` pairs.
    pub rename: Vec<(PathBuf, PathBuf)>,
}

impl FileSets {
    pub fn len(&self) -> usize {
        self.add.len() + self.edit.len() + self.delete.len() + self.rename.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a commit was matched to a changelist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ChangelistUse {
    Created(ChangelistId),
    Reused(ChangelistId),
    /// Dry-run for a commit that would get a fresh changelist.
    WouldCreate,
}

impl ChangelistUse {
    pub fn id(&self) -> Option<&ChangelistId> {
        match self {
            Self::Created(id) | Self::Reused(id) => Some(id),
            Self::WouldCreate => None,
        }
    }
}

impl std::fmt::Display for ChangelistUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created(id) => write!(f, "{} (new)", id),
            Self::Reused(id) => write!(f, "{} (reused)", id),
            Self::WouldCreate => write!(f, "new"),
        }
    }
}

/// Status of one commit's reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Converted,
    DryRun,
    Failed(String),
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converted => write!(f, "converted"),
            Self::DryRun => write!(f, "dry_run"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Per-commit record appended to the [`RunResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub revision: String,
    pub summary: String,
    pub changelist: Option<ChangelistUse>,
    pub files: FileSets,
    pub status: OutcomeStatus,
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed(_))
    }
}

/// What a reconciliation run did.
#[derive(Debug, Serialize)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<CommitOutcome>,
    /// Display form of the fatal error that stopped the run.
    pub failure: Option<String>,
    #[serde(skip)]
    pub error: Option<ReconcileError>,
}

impl RunResult {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::new(),
            failure: None,
            error: None,
        }
    }

    /// Number of commits fully processed (dry-run commits included).
    pub fn converted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// The last commit processed without error.
    pub fn last_converted(&self) -> Option<&str> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.is_success())
            .map(|o| o.revision.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn fail(&mut self, err: ReconcileError) {
        self.failure = Some(err.to_string());
        self.error = Some(err);
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}
