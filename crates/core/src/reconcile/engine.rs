//! Per-commit reconciliation of source commits into target changelists.
//!
//! For each commit, oldest first:
//!
//! 1. look up a pending changelist whose description matches the commit
//!    message,
//! 2. make sure such a changelist only holds files this commit touches,
//! 3. claim the commit's paths in the [`OpenFileLedger`], checking them
//!    against other open files unless step 2 found the changelist already
//!    holding some of them,
//! 4. partition the changes by the verb that opens them,
//! 5. resolve the depot path of every rename source,
//! 6. check the commit out and open its files in the changelist,
//! 7. shelve and revert the changelist.
//!
//! Steps 1 to 5 only read from either side, so a failure there leaves no
//! trace. Steps 6 and 7 are skipped under dry-run and replaced by a report.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use super::ledger::OpenFileLedger;
use super::reuse::ReuseIndex;
use crate::errors::{P4Error, ReconcileError};
use crate::gateway::{SourceRepository, TargetRepository};
use crate::models::{
    ChangelistId, ChangelistSpec, ChangelistUse, Commit, CommitOutcome, FileChangeKind,
    FileSets, OpenAction, OutcomeStatus, RunPolicy, RunResult, WorkspaceContext,
};

/// Depot scope passed to `revert -k` after shelving.
pub const REVERT_SCOPE: &str = "//...";

/// Mutable state carried from one commit to the next within a run.
#[derive(Debug)]
pub struct RunState {
    pub workspace: WorkspaceContext,
    pub ledger: OpenFileLedger,
    pub reuse: ReuseIndex,
}

impl RunState {
    pub fn new(workspace: WorkspaceContext) -> Self {
        Self {
            workspace,
            ledger: OpenFileLedger::new(),
            reuse: ReuseIndex::new(),
        }
    }
}

/// Drives commits through the target workspace.
pub struct Reconciler<'a, S, T> {
    source: &'a S,
    target: &'a T,
    policy: &'a RunPolicy,
}

impl<'a, S, T> Reconciler<'a, S, T>
where
    S: SourceRepository,
    T: TargetRepository,
{
    pub fn new(source: &'a S, target: &'a T, policy: &'a RunPolicy) -> Self {
        Self {
            source,
            target,
            policy,
        }
    }

    /// Reconcile `revisions`, given newest first as the source lists them.
    ///
    /// Stops at the first error. Commits converted before it stay converted.
    pub async fn reconcile(&self, revisions: &[String], state: &mut RunState) -> RunResult {
        let mut result = RunResult::new();
        info!(count = revisions.len(), "looking at commits to convert");

        for revision in revisions.iter().rev() {
            let mut outcome = CommitOutcome {
                revision: revision.clone(),
                summary: String::new(),
                changelist: None,
                files: FileSets::default(),
                status: OutcomeStatus::Converted,
            };
            match self.reconcile_commit(revision, state, &mut outcome).await {
                Ok(()) => result.outcomes.push(outcome),
                Err(err) => {
                    error!(revision = %revision, error = %err, "ending conversion");
                    outcome.status = OutcomeStatus::Failed(err.to_string());
                    result.outcomes.push(outcome);
                    result.fail(err);
                    break;
                }
            }
        }

        result.finish();
        info!(converted = result.converted(), "converted commits");
        result
    }

    async fn reconcile_commit(
        &self,
        revision: &str,
        state: &mut RunState,
        outcome: &mut CommitOutcome,
    ) -> Result<(), ReconcileError> {
        let commit = self.load_commit(revision)?;
        outcome.summary = commit.summary().to_string();
        info!(revision = %revision, summary = %commit.summary(), "converting commit");
        debug!(files = commit.changes.len(), "commit file count");

        let touched = commit.touched_paths();

        let (reuse, holds_files) = match state.reuse.lookup(commit.reuse_key()).cloned() {
            Some(id) => {
                debug!(changelist = %id, "found a possible changelist to reuse");
                let holds_files = self.validate_reuse(&commit, &id, &touched).await?;
                (Some(id), holds_files)
            }
            None => (None, false),
        };

        if holds_files {
            debug!("reused changelist holds this commit's files, skipping open file check");
            state.ledger.record(&touched, revision, reuse.as_ref());
        } else if let Err(paths) = state.ledger.claim(&touched, revision, reuse.as_ref()) {
            for path in &paths {
                warn!(
                    path = %path.display(),
                    holder = ?state.ledger.holder(path),
                    "file already open in a pending changelist"
                );
            }
            return Err(ReconcileError::OpenElsewhere {
                revision: revision.to_string(),
                paths,
            });
        }

        let files = classify(&commit)?;
        outcome.files = files.clone();

        let rename_sources = self.resolve_rename_sources(&files).await?;

        if self.policy.dry_run {
            report_dry_run(revision, reuse.as_ref(), &files);
            outcome.changelist = Some(match reuse {
                Some(id) => ChangelistUse::Reused(id),
                None => ChangelistUse::WouldCreate,
            });
            outcome.status = OutcomeStatus::DryRun;
            return Ok(());
        }

        self.source.checkout(revision)?;

        let (changelist, used) = match reuse {
            Some(id) => (id.clone(), ChangelistUse::Reused(id)),
            None => {
                let spec = ChangelistSpec {
                    client: state.workspace.client.clone(),
                    user: state.workspace.user.clone(),
                    description: commit.message.clone(),
                };
                let id = self.target.create_changelist(&spec).await?;
                state.reuse.register(commit.reuse_key(), id.clone());
                state.ledger.attach(revision, &id);
                (id.clone(), ChangelistUse::Created(id))
            }
        };
        outcome.changelist = Some(used.clone());
        let changelist = &changelist;

        self.open_files(&files, &rename_sources).await?;

        let mut reassign: Vec<String> = commit
            .changes
            .iter()
            .map(|change| change.path.display().to_string())
            .collect();
        reassign.extend(rename_sources.iter().cloned());
        if reassign.is_empty() {
            warn!(changelist = %changelist, "commit has no file changes, leaving changelist empty");
            return Ok(());
        }
        self.target.reopen(&reassign, changelist).await?;

        if self.policy.shelve {
            self.target.shelve(changelist).await?;
        }
        if self.policy.reverts() {
            self.target
                .revert_keeping_local(changelist, REVERT_SCOPE)
                .await?;
        }

        info!(revision = %revision, changelist = %used, "commit converted");
        Ok(())
    }

    fn load_commit(&self, revision: &str) -> Result<Commit, ReconcileError> {
        let message = self.source.commit_message(revision)?;
        let changes = self
            .source
            .commit_file_changes(revision, self.policy.rename_threshold)?;
        Ok(Commit {
            revision: revision.to_string(),
            message,
            changes,
        })
    }

    /// A reusable changelist may only hold files the commit touches.
    ///
    /// Returns whether the changelist holds any files at all.
    async fn validate_reuse(
        &self,
        commit: &Commit,
        changelist: &ChangelistId,
        touched: &[PathBuf],
    ) -> Result<bool, ReconcileError> {
        let opened = self.target.opened_files(Some(changelist)).await?;
        if opened.is_empty() {
            debug!(changelist = %changelist, "empty changelist, ok to reuse");
            return Ok(false);
        }

        let depot_paths: Vec<String> = opened.into_iter().map(|f| f.depot_path).collect();
        let mapped = self.target.map_to_local(&depot_paths).await?;
        let unexpected: Vec<PathBuf> = mapped
            .into_iter()
            .map(|m| m.local_path)
            .filter(|path| !touched.contains(path))
            .collect();

        if !unexpected.is_empty() {
            error!(
                changelist = %changelist,
                revision = %commit.revision,
                "found changelist with same description as commit but different files"
            );
            return Err(ReconcileError::ReuseMismatch {
                changelist: changelist.to_string(),
                revision: commit.revision.clone(),
                unexpected,
            });
        }

        debug!(changelist = %changelist, "changelist holds a subset of the commit's files, ok to reuse");
        Ok(true)
    }

    /// Depot path of each rename source, in rename order.
    async fn resolve_rename_sources(&self, files: &FileSets) -> Result<Vec<String>, ReconcileError> {
        if files.rename.is_empty() {
            return Ok(Vec::new());
        }
        let sources: Vec<PathBuf> = files.rename.iter().map(|(from, _)| from.clone()).collect();
        let depot = self.target.fstat(&sources).await?;
        if depot.len() != sources.len() {
            return Err(P4Error::MalformedOutput(format!(
                "fstat resolved {} of {} rename sources",
                depot.len(),
                sources.len()
            ))
            .into());
        }

        sources
            .into_iter()
            .zip(depot)
            .map(|(path, depot_path)| {
                depot_path.ok_or(ReconcileError::MissingDepotMapping { path })
            })
            .collect()
    }

    async fn open_files(
        &self,
        files: &FileSets,
        rename_sources: &[String],
    ) -> Result<(), ReconcileError> {
        for (action, paths) in [
            (OpenAction::Add, &files.add),
            (OpenAction::Edit, &files.edit),
            (OpenAction::Delete, &files.delete),
        ] {
            if paths.is_empty() {
                continue;
            }
            let specs: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            self.target.open(action, &specs, None).await?;
        }

        // Each rename is an edit of the old depot file followed by the move.
        for ((from, to), depot_path) in files.rename.iter().zip(rename_sources) {
            self.target.edit_keeping_local(depot_path).await?;
            self.target.rename_keeping_local(from, to).await?;
        }
        Ok(())
    }
}

/// Partition a commit's changes by the verb that opens them.
pub fn classify(commit: &Commit) -> Result<FileSets, ReconcileError> {
    let mut files = FileSets::default();
    for change in &commit.changes {
        match &change.kind {
            FileChangeKind::Add => files.add.push(change.path.clone()),
            FileChangeKind::Modify => files.edit.push(change.path.clone()),
            FileChangeKind::Delete => files.delete.push(change.path.clone()),
            FileChangeKind::Rename { from } => {
                files.rename.push((from.clone(), change.path.clone()))
            }
            FileChangeKind::Unsupported(status) => {
                error!(status = %status, path = %change.path.display(), "unsupported file status");
                return Err(ReconcileError::UnsupportedChange {
                    path: change.path.clone(),
                    status: *status,
                });
            }
        }
    }
    Ok(files)
}

fn report_dry_run(revision: &str, reuse: Option<&ChangelistId>, files: &FileSets) {
    info!("would check out commit {}", revision);
    match reuse {
        Some(id) => info!("would reuse changelist {}", id),
        None => info!("would create a new changelist"),
    }
    for (verb, paths) in [
        ("add", &files.add),
        ("edit", &files.edit),
        ("delete", &files.delete),
    ] {
        if paths.is_empty() {
            continue;
        }
        info!("would open {} files for {}:", paths.len(), verb);
        for path in paths {
            info!(" - {}", path.display());
        }
    }
    if !files.rename.is_empty() {
        info!("would open {} files for move:", files.rename.len());
        for (from, to) in &files.rename {
            info!(" - {} -> {}", from.display(), to.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileChange;

    #[test]
    fn test_classify_partitions_changes() {
        let commit = Commit {
            revision: "c1".into(),
            message: "Mixed".into(),
            changes: vec![
                FileChange::new("/repo/new.txt", FileChangeKind::Add),
                FileChange::new("/repo/mod.txt", FileChangeKind::Modify),
                FileChange::new("/repo/gone.txt", FileChangeKind::Delete),
                FileChange::renamed("/repo/a.txt", "/repo/b.txt"),
            ],
        };
        let files = classify(&commit).unwrap();
        assert_eq!(files.add, vec![PathBuf::from("/repo/new.txt")]);
        assert_eq!(files.edit, vec![PathBuf::from("/repo/mod.txt")]);
        assert_eq!(files.delete, vec![PathBuf::from("/repo/gone.txt")]);
        assert_eq!(
            files.rename,
            vec![(PathBuf::from("/repo/a.txt"), PathBuf::from("/repo/b.txt"))]
        );
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn test_classify_rejects_unknown_status() {
        let commit = Commit {
            revision: "c1".into(),
            message: "Copy".into(),
            changes: vec![
                FileChange::new("/repo/a.txt", FileChangeKind::Add),
                FileChange::new("/repo/link", FileChangeKind::Unsupported('T')),
            ],
        };
        let err = classify(&commit).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnsupportedChange { status: 'T', .. }
        ));
    }
}
