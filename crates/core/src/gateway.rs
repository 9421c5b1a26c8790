//! Interfaces to the two external version-control systems.
//!
//! The reconciliation engine and session controller only talk to these
//! traits. [`crate::git::GitClient`] and [`crate::p4::P4Client`] are the real
//! implementations; tests substitute in-memory fakes.

use std::path::{Path, PathBuf};

use crate::errors::{GitError, P4Error};
use crate::models::{
    ChangelistId, ChangelistSpec, FileChange, FileMapping, OpenAction, OpenedFile,
    PendingChangelist, RunPosition, WorkspaceContext,
};

/// Read queries and position changes on the source (Git) repository.
pub trait SourceRepository {
    /// Root of the working copy; commit paths are made absolute against it.
    fn workdir(&self) -> &Path;

    fn current_position(&self) -> Result<RunPosition, GitError>;

    /// Whether checking out other commits could clobber local work.
    fn has_local_modifications(&self) -> Result<bool, GitError>;

    /// Resolve a ref name (branch, tag, hash, `HEAD`) to a commit hash.
    /// Fails with [`GitError::RefNotFound`] when it does not exist.
    fn resolve_ref(&self, name: &str) -> Result<String, GitError>;

    /// Name of the repository's default branch.
    fn default_branch(&self) -> Result<String, GitError>;

    /// Commits on the ancestry path `from..to`, newest first.
    fn commit_range(&self, from: &str, to: &str) -> Result<Vec<String>, GitError>;

    fn commit_message(&self, revision: &str) -> Result<String, GitError>;

    fn commit_file_changes(
        &self,
        revision: &str,
        rename_threshold: Option<u16>,
    ) -> Result<Vec<FileChange>, GitError>;

    /// Move the working copy to `reference` (branch, tag or hash).
    fn checkout(&self, reference: &str) -> Result<(), GitError>;

    /// Point `branch` at `revision`, check it out and force the working tree
    /// to match.
    fn reset_branch(&self, branch: &str, revision: &str) -> Result<(), GitError>;
}

/// Queries and mutations on the target (Perforce) workspace.
#[allow(async_fn_in_trait)]
pub trait TargetRepository {
    async fn info(&self) -> Result<WorkspaceContext, P4Error>;

    /// Files open on the current client, optionally restricted to one
    /// changelist.
    async fn opened_files(
        &self,
        changelist: Option<&ChangelistId>,
    ) -> Result<Vec<OpenedFile>, P4Error>;

    async fn map_to_local(&self, depot_paths: &[String]) -> Result<Vec<FileMapping>, P4Error>;

    async fn pending_changelists(&self, client: &str)
        -> Result<Vec<PendingChangelist>, P4Error>;

    /// Depot path of each local path, aligned with the input; `None` where
    /// the file is unknown to the depot.
    async fn fstat(&self, local_paths: &[PathBuf]) -> Result<Vec<Option<String>>, P4Error>;

    async fn create_changelist(&self, spec: &ChangelistSpec) -> Result<ChangelistId, P4Error>;

    async fn open(
        &self,
        action: OpenAction,
        files: &[String],
        changelist: Option<&ChangelistId>,
    ) -> Result<(), P4Error>;

    /// Open a depot file for edit without touching its local content.
    async fn edit_keeping_local(&self, depot_path: &str) -> Result<(), P4Error>;

    /// Record a move whose local effect already happened.
    async fn rename_keeping_local(&self, from: &Path, to: &Path) -> Result<(), P4Error>;

    async fn reopen(&self, files: &[String], changelist: &ChangelistId) -> Result<(), P4Error>;

    async fn shelve(&self, changelist: &ChangelistId) -> Result<(), P4Error>;

    /// Revert the changelist's files within `scope`, leaving local content.
    async fn revert_keeping_local(
        &self,
        changelist: &ChangelistId,
        scope: &str,
    ) -> Result<(), P4Error>;
}
