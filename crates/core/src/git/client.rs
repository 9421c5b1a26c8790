//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    Delta, DiffFindOptions, ErrorCode, Oid, Repository, ResetType, Sort, Status, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::gateway::SourceRepository;
use crate::models::{FileChange, FileChangeKind, RunPosition};

/// Used when `init.defaultBranch` is not configured, as git itself does.
const FALLBACK_DEFAULT_BRANCH: &str = "master";

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    workdir: PathBuf,
}

impl GitClient {
    /// Open the repository containing `path` (searching upwards).
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::discover(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::NoWorkdir(path.display().to_string()))?
            .to_path_buf();
        debug!(workdir = %workdir.display(), "git repository root");
        Ok(Self { repo, workdir })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    fn resolve_oid(&self, name: &str) -> Result<Oid, GitError> {
        let object = self.repo.revparse_single(name).map_err(|e| match e.code() {
            ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous => {
                GitError::RefNotFound(name.to_string())
            }
            _ => GitError::Git2Error(e),
        })?;
        Ok(object.peel_to_commit()?.id())
    }
}

/// `git diff-tree --name-status` letter for a delta.
fn status_code(delta: Delta) -> char {
    match delta {
        Delta::Added => 'A',
        Delta::Deleted => 'D',
        Delta::Modified => 'M',
        Delta::Renamed => 'R',
        Delta::Copied => 'C',
        Delta::Typechange => 'T',
        Delta::Unreadable => 'X',
        Delta::Conflicted => 'U',
        Delta::Ignored => '!',
        Delta::Untracked => '?',
        Delta::Unmodified => ' ',
    }
}

impl SourceRepository for GitClient {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn current_position(&self) -> Result<RunPosition, GitError> {
        let head = self.repo.head()?;
        let commit = head.peel_to_commit()?;
        let branch = if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        };
        Ok(RunPosition {
            head: commit.id().to_string(),
            branch,
        })
    }

    fn has_local_modifications(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let dirty = statuses
            .iter()
            .filter(|entry| !entry.status().contains(Status::IGNORED))
            .inspect(|entry| debug!(path = ?entry.path(), status = ?entry.status(), "local change"))
            .count();
        Ok(dirty > 0)
    }

    fn resolve_ref(&self, name: &str) -> Result<String, GitError> {
        Ok(self.resolve_oid(name)?.to_string())
    }

    fn default_branch(&self) -> Result<String, GitError> {
        let config = self.repo.config()?;
        match config.get_string("init.defaultBranch") {
            Ok(name) if !name.is_empty() => Ok(name),
            _ => Ok(FALLBACK_DEFAULT_BRANCH.to_string()),
        }
    }

    #[instrument(skip(self))]
    fn commit_range(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let from_oid = self.resolve_oid(from)?;
        let to_oid = self.resolve_oid(to)?;

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL)?;
        revwalk.push(to_oid)?;
        revwalk.hide(from_oid)?;

        let mut commits = Vec::new();
        for oid_result in revwalk {
            let oid = oid_result?;
            // Ancestry path: only commits that descend from `from`.
            if self.repo.graph_descendant_of(oid, from_oid)? {
                commits.push(oid.to_string());
            } else {
                debug!(%oid, "skipping commit off the ancestry path");
            }
        }
        debug!(count = commits.len(), "collected commit range");
        Ok(commits)
    }

    fn commit_message(&self, revision: &str) -> Result<String, GitError> {
        let commit = self.repo.find_commit(self.resolve_oid(revision)?)?;
        Ok(String::from_utf8_lossy(commit.message_bytes()).into_owned())
    }

    #[instrument(skip(self))]
    fn commit_file_changes(
        &self,
        revision: &str,
        rename_threshold: Option<u16>,
    ) -> Result<Vec<FileChange>, GitError> {
        let commit = self.repo.find_commit(self.resolve_oid(revision)?)?;
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() > 0 {
            if commit.parent_count() > 1 {
                warn!(revision, "merge commit, diffing against first parent");
            }
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        if let Some(threshold) = rename_threshold {
            find_opts.rename_threshold(threshold);
        }
        diff.find_similar(Some(&mut find_opts))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let old_path = delta.old_file().path().map(|p| self.workdir.join(p));
            let new_path = delta.new_file().path().map(|p| self.workdir.join(p));
            let (path, kind) = match (delta.status(), old_path, new_path) {
                (Delta::Added, _, Some(new)) => (new, FileChangeKind::Add),
                (Delta::Modified, _, Some(new)) => (new, FileChangeKind::Modify),
                (Delta::Deleted, Some(old), _) => (old, FileChangeKind::Delete),
                (Delta::Renamed, Some(old), Some(new)) => {
                    (new, FileChangeKind::Rename { from: old })
                }
                (other, old, new) => match new.or(old) {
                    Some(path) => (path, FileChangeKind::Unsupported(status_code(other))),
                    None => continue,
                },
            };
            changes.push(FileChange { path, kind });
        }
        debug!(count = changes.len(), "collected file changes");
        Ok(changes)
    }

    #[instrument(skip(self))]
    fn checkout(&self, reference: &str) -> Result<(), GitError> {
        let (object, found_ref) = self.repo.revparse_ext(reference).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                GitError::RefNotFound(reference.to_string())
            } else {
                GitError::Git2Error(e)
            }
        })?;
        self.repo
            .checkout_tree(&object, Some(CheckoutBuilder::new().safe()))?;

        match found_ref.filter(|r| r.is_branch()).and_then(|r| r.name().map(str::to_string)) {
            Some(refname) => self.repo.set_head(&refname)?,
            None => self.repo.set_head_detached(object.peel_to_commit()?.id())?,
        }
        debug!(reference, "checked out");
        Ok(())
    }

    #[instrument(skip(self))]
    fn reset_branch(&self, branch: &str, revision: &str) -> Result<(), GitError> {
        let commit = self.repo.find_commit(self.resolve_oid(revision)?)?;
        let refname = format!("refs/heads/{}", branch);
        let log_message = format!("git4p4: reset {} to {}", branch, revision);
        self.repo
            .reference(&refname, commit.id(), true, &log_message)?;
        self.repo.set_head(&refname)?;
        self.repo
            .reset(commit.as_object(), ResetType::Hard, None)?;
        info!(branch, revision, "reset branch");
        Ok(())
    }
}
