//! One end-to-end conversion run.
//!
//! The session checks the source working copy, works out which commits to
//! convert, prepares the per-run state from the target workspace, hands the
//! commits to the [`Reconciler`] and finally moves the tracking branch and
//! the source position according to the [`RunPolicy`].

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{GitError, SessionError};
use crate::gateway::{SourceRepository, TargetRepository};
use crate::models::{ChangelistId, RunPolicy, RunPosition, RunResult};
use crate::reconcile::{Reconciler, ReuseIndex, RunState};

/// Separator between the two ends of an explicit commit range.
pub const RANGE_SEPARATOR: &str = "..";

/// Symmetric-difference separator, which has no meaning for a linear
/// conversion.
const SYMMETRIC_SEPARATOR: &str = "...";

/// The `from..to` pair handed to the source gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRange {
    pub from: String,
    pub to: String,
}

impl std::fmt::Display for CommitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.from, RANGE_SEPARATOR, self.to)
    }
}

/// Work out the commit range.
///
/// An argument containing `..` is taken as is, an empty side meaning `HEAD`.
/// Any other argument is the end point, starting from `marker`. Without an
/// argument the range runs from `marker` to the default branch. `A...B` is
/// rejected.
pub fn compute_range(
    arg: Option<&str>,
    marker: &str,
    default_branch: &str,
) -> Result<CommitRange, SessionError> {
    let side = |s: &str| {
        if s.is_empty() {
            "HEAD".to_string()
        } else {
            s.to_string()
        }
    };
    let range = match arg.map(str::trim).filter(|a| !a.is_empty()) {
        Some(range) if range.contains(SYMMETRIC_SEPARATOR) => {
            return Err(SessionError::InvalidRange(range.to_string()))
        }
        Some(range) => match range.split_once(RANGE_SEPARATOR) {
            Some((from, to)) => CommitRange {
                from: side(from),
                to: side(to),
            },
            None => CommitRange {
                from: marker.to_string(),
                to: range.to_string(),
            },
        },
        None => CommitRange {
            from: marker.to_string(),
            to: default_branch.to_string(),
        },
    };
    Ok(range)
}

/// Everything a run did, for the terminal summary or `--json`.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub start: RunPosition,
    pub range: CommitRange,
    pub dry_run: bool,
    pub result: RunResult,
    /// Position changes made (or, under dry-run, that would be made) after
    /// the commits were processed.
    pub notes: Vec<String>,
    /// Git errors hit while moving the tracking branch or the position back.
    pub finish_errors: Vec<String>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.result.is_success() && self.finish_errors.is_empty()
    }
}

/// Runs the full conversion against a pair of gateways.
pub struct Session<'a, S, T> {
    source: &'a S,
    target: &'a T,
    policy: &'a RunPolicy,
}

impl<'a, S, T> Session<'a, S, T>
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

    /// Convert the commits selected by `range_arg`.
    ///
    /// Errors from the per-commit loop end up in the report's [`RunResult`],
    /// and errors while moving the branch or position afterwards in
    /// `finish_errors`. An `Err` means no commit was touched.
    #[instrument(skip(self), fields(dry_run = self.policy.dry_run))]
    pub async fn run(&self, range_arg: Option<&str>) -> Result<SessionReport, SessionError> {
        if self.source.has_local_modifications()? {
            error!("git working copy has local changes, commit or stash them first");
            return Err(SessionError::DirtyWorkingCopy);
        }

        let start = self.source.current_position()?;
        debug!(head = %start.head, branch = ?start.branch, "starting position");

        let marker = match self.source.resolve_ref(&self.policy.tracking_branch) {
            Ok(hash) => {
                debug!(branch = %self.policy.tracking_branch, %hash, "tracking branch found");
                hash
            }
            Err(GitError::RefNotFound(_)) => {
                warn!(
                    branch = %self.policy.tracking_branch,
                    "no tracking branch found, will start from HEAD"
                );
                "HEAD".to_string()
            }
            Err(e) => return Err(e.into()),
        };

        let default_branch = self.source.default_branch()?;
        let default_tip = match self.source.resolve_ref(&default_branch) {
            Ok(hash) => Some(hash),
            Err(GitError::RefNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        debug!(branch = %default_branch, tip = ?default_tip, "default branch");

        let range = compute_range(range_arg, &marker, &default_branch)?;
        let revisions = self.source.commit_range(&range.from, &range.to)?;

        let mut report = SessionReport {
            start,
            range,
            dry_run: self.policy.dry_run,
            result: RunResult::new(),
            notes: Vec::new(),
            finish_errors: Vec::new(),
        };

        if revisions.is_empty() {
            info!(range = %report.range, "no commits to convert");
            report.result.finish();
            return Ok(report);
        }

        let mut state = self.prepare().await?;
        report.result = Reconciler::new(self.source, self.target, self.policy)
            .reconcile(&revisions, &mut state)
            .await;

        self.finish(&mut report, &default_branch, default_tip.as_deref());
        Ok(report)
    }

    /// Query the target workspace and build the run state.
    async fn prepare(&self) -> Result<RunState, SessionError> {
        let workspace = self.target.info().await?;
        debug!(user = %workspace.user, client = %workspace.client, "got p4 workspace");
        let mut state = RunState::new(workspace);

        if self.policy.ignore_opened {
            debug!("ignoring files already opened in p4");
        } else {
            let opened = self.target.opened_files(None).await?;
            if !opened.is_empty() {
                let owners: HashMap<String, ChangelistId> = opened
                    .iter()
                    .map(|f| (f.depot_path.clone(), f.changelist.clone()))
                    .collect();
                let depot_paths: Vec<String> = opened.into_iter().map(|f| f.depot_path).collect();
                let mappings = match self.target.map_to_local(&depot_paths).await {
                    Ok(mappings) => mappings,
                    Err(e) if e.is_not_found() => {
                        debug!("no opened file maps into this workspace");
                        Vec::new()
                    }
                    Err(e) => return Err(e.into()),
                };
                for mapping in mappings {
                    if let Some(changelist) = owners.get(&mapping.depot_path) {
                        debug!(path = %mapping.local_path.display(), %changelist, "already opened");
                        state.ledger.seed(mapping.local_path, changelist.clone());
                    }
                }
            }
        }

        debug!(count = state.ledger.len(), "files already open in p4");

        let pending = self
            .target
            .pending_changelists(&state.workspace.client)
            .await?;
        state.reuse = ReuseIndex::from_pending(pending);
        Ok(state)
    }

    /// Advance the tracking branch and put the working copy back.
    ///
    /// Each step runs even if an earlier one failed; failures are recorded
    /// in the report.
    fn finish(&self, report: &mut SessionReport, default_branch: &str, default_tip: Option<&str>) {
        let policy = self.policy;
        let branch = &policy.tracking_branch;

        match report.result.last_converted().map(str::to_string) {
            Some(last) if policy.manage_tracking_branch => {
                if policy.dry_run {
                    note(report, format!("would reset {} branch to {}", branch, last));
                } else {
                    match self.source.reset_branch(branch, &last) {
                        Ok(()) => note(report, format!("reset {} branch to {}", branch, last)),
                        Err(e) => finish_error(
                            report,
                            format!("failed to reset {} branch to {}: {}", branch, last, e),
                        ),
                    }
                }
            }
            Some(last) => note(
                report,
                format!(
                    "you can reset the {b} branch to {l} once done (git checkout {b}; git reset --hard {l})",
                    b = branch,
                    l = last
                ),
            ),
            None => debug!("no commit converted, tracking branch left alone"),
        }

        let restore = report.start.restore_ref().to_string();
        if policy.stay {
            warn!("leaving HEAD where it is");
        } else if policy.dry_run {
            note(report, format!("would return HEAD to {}", restore));
        } else {
            match self.source.checkout(&restore) {
                Ok(()) => note(report, format!("returned HEAD to {}", restore)),
                Err(e) => {
                    finish_error(report, format!("failed to return HEAD to {}: {}", restore, e));
                    return;
                }
            }
        }

        // With the tracking branch caught up to the default branch, the
        // default branch is the natural place to end up.
        if !policy.manage_tracking_branch {
            return;
        }
        let current = match self.source.current_position() {
            Ok(current) => current,
            Err(e) => {
                finish_error(report, format!("failed to read the final position: {}", e));
                return;
            }
        };
        if Some(current.head.as_str()) != default_tip
            || current.branch.as_deref() == Some(default_branch)
        {
            return;
        }
        if policy.dry_run {
            note(report, format!("would switch back to default branch {}", default_branch));
        } else if let Err(e) = self.source.checkout(default_branch) {
            finish_error(
                report,
                format!("failed to switch back to default branch {}: {}", default_branch, e),
            );
        } else {
            note(report, format!("switched back to default branch {}", default_branch));
        }
    }
}

fn note(report: &mut SessionReport, message: String) {
    info!("{}", message);
    report.notes.push(message);
}

fn finish_error(report: &mut SessionReport, message: String) {
    error!("{}", message);
    report.finish_errors.push(message);
}
