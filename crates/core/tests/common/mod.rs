//! In-memory gateways for engine and session tests.
//!
//! Both fakes record every call as a short command line so tests can assert
//! on the exact sequence sent to each side.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use git4p4_core::errors::{GitError, P4Error};
use git4p4_core::gateway::{SourceRepository, TargetRepository};
use git4p4_core::models::{
    ChangelistId, ChangelistSpec, Commit, FileChange, FileChangeKind, FileMapping, OpenAction,
    OpenedFile, PendingChangelist, RunPosition, WorkspaceContext,
};

// ===========================================================================
// Builders
// ===========================================================================

pub fn commit(revision: &str, message: &str, changes: Vec<FileChange>) -> Commit {
    Commit {
        revision: revision.into(),
        message: message.into(),
        changes,
    }
}

pub fn add(path: &str) -> FileChange {
    FileChange::new(path, FileChangeKind::Add)
}

pub fn modify(path: &str) -> FileChange {
    FileChange::new(path, FileChangeKind::Modify)
}

pub fn delete(path: &str) -> FileChange {
    FileChange::new(path, FileChangeKind::Delete)
}

pub fn rename(from: &str, to: &str) -> FileChange {
    FileChange::renamed(from, to)
}

pub fn workspace() -> WorkspaceContext {
    WorkspaceContext {
        user: "jdoe".into(),
        client: "jdoe-ws".into(),
    }
}

/// Depot path the fake target assigns to a local path.
pub fn depot_path(local: &Path) -> String {
    format!("//depot{}", local.display())
}

fn local_path(depot: &str) -> PathBuf {
    PathBuf::from(depot.trim_start_matches("//depot"))
}

fn join(items: impl IntoIterator<Item = String>) -> String {
    items.into_iter().collect::<Vec<_>>().join(" ")
}

// ===========================================================================
// Source
// ===========================================================================

/// A linear history. Starts checked out on `master` at the newest commit,
/// with the `p4` tracking branch at `base`, the parent of the first commit.
pub struct FakeSource {
    workdir: PathBuf,
    commits: Vec<Commit>,
    dirty: bool,
    reset_fails: bool,
    default_branch: String,
    branches: RefCell<HashMap<String, String>>,
    position: RefCell<RunPosition>,
    calls: RefCell<Vec<String>>,
}

impl FakeSource {
    pub fn new(commits: Vec<Commit>) -> Self {
        let tip = commits
            .last()
            .map(|c| c.revision.clone())
            .unwrap_or_else(|| "base".into());
        let mut branches = HashMap::new();
        branches.insert("master".to_string(), tip.clone());
        branches.insert("p4".to_string(), "base".to_string());
        Self {
            workdir: PathBuf::from("/repo"),
            commits,
            dirty: false,
            reset_fails: false,
            default_branch: "master".into(),
            branches: RefCell::new(branches),
            position: RefCell::new(RunPosition {
                head: tip,
                branch: Some("master".into()),
            }),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }

    /// `reset_branch` fails without moving anything.
    pub fn failing_reset(mut self) -> Self {
        self.reset_fails = true;
        self
    }

    pub fn with_branch(self, name: &str, hash: &str) -> Self {
        self.branches
            .borrow_mut()
            .insert(name.to_string(), hash.to_string());
        self
    }

    pub fn without_branch(self, name: &str) -> Self {
        self.branches.borrow_mut().remove(name);
        self
    }

    pub fn detached_at(self, hash: &str) -> Self {
        *self.position.borrow_mut() = RunPosition {
            head: hash.to_string(),
            branch: None,
        };
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn position(&self) -> RunPosition {
        self.position.borrow().clone()
    }

    pub fn branch(&self, name: &str) -> Option<String> {
        self.branches.borrow().get(name).cloned()
    }

    fn find(&self, revision: &str) -> Result<&Commit, GitError> {
        self.commits
            .iter()
            .find(|c| c.revision == revision)
            .ok_or_else(|| GitError::RefNotFound(revision.to_string()))
    }

    fn index_of(&self, reference: &str) -> Option<usize> {
        let hash = self.resolve_ref(reference).ok()?;
        self.commits.iter().position(|c| c.revision == hash)
    }
}

impl SourceRepository for FakeSource {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn current_position(&self) -> Result<RunPosition, GitError> {
        Ok(self.position())
    }

    fn has_local_modifications(&self) -> Result<bool, GitError> {
        Ok(self.dirty)
    }

    fn resolve_ref(&self, name: &str) -> Result<String, GitError> {
        if name == "HEAD" {
            return Ok(self.position.borrow().head.clone());
        }
        if let Some(hash) = self.branches.borrow().get(name) {
            return Ok(hash.clone());
        }
        if name == "base" || self.commits.iter().any(|c| c.revision == name) {
            return Ok(name.to_string());
        }
        Err(GitError::RefNotFound(name.to_string()))
    }

    fn default_branch(&self) -> Result<String, GitError> {
        Ok(self.default_branch.clone())
    }

    fn commit_range(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        self.calls.borrow_mut().push(format!("range {}..{}", from, to));
        let start = self.index_of(from).map(|i| i + 1).unwrap_or(0);
        let end = match self.index_of(to) {
            Some(i) => i + 1,
            None => {
                self.resolve_ref(to)?;
                start
            }
        };
        Ok(self
            .commits
            .get(start..end.max(start))
            .unwrap_or(&[])
            .iter()
            .rev()
            .map(|c| c.revision.clone())
            .collect())
    }

    fn commit_message(&self, revision: &str) -> Result<String, GitError> {
        Ok(self.find(revision)?.message.clone())
    }

    fn commit_file_changes(
        &self,
        revision: &str,
        _rename_threshold: Option<u16>,
    ) -> Result<Vec<FileChange>, GitError> {
        Ok(self.find(revision)?.changes.clone())
    }

    fn checkout(&self, reference: &str) -> Result<(), GitError> {
        self.calls.borrow_mut().push(format!("checkout {}", reference));
        let branch_tip = self.branches.borrow().get(reference).cloned();
        let position = match branch_tip {
            Some(head) => RunPosition {
                head,
                branch: Some(reference.to_string()),
            },
            None => RunPosition {
                head: self.resolve_ref(reference)?,
                branch: None,
            },
        };
        *self.position.borrow_mut() = position;
        Ok(())
    }

    fn reset_branch(&self, branch: &str, revision: &str) -> Result<(), GitError> {
        self.calls
            .borrow_mut()
            .push(format!("reset_branch {} {}", branch, revision));
        if self.reset_fails {
            return Err(GitError::RefNotFound(branch.to_string()));
        }
        self.branches
            .borrow_mut()
            .insert(branch.to_string(), revision.to_string());
        *self.position.borrow_mut() = RunPosition {
            head: revision.to_string(),
            branch: Some(branch.to_string()),
        };
        Ok(())
    }
}

// ===========================================================================
// Target
// ===========================================================================

const MUTATING: &[&str] = &[
    "change", "add", "edit", "delete", "move", "reopen", "shelve", "revert",
];

/// A Perforce workspace keeping track of open files and pending changelists.
pub struct FakeTarget {
    workspace: WorkspaceContext,
    opened: RefCell<Vec<OpenedFile>>,
    pending: RefCell<Vec<PendingChangelist>>,
    unknown: RefCell<HashSet<PathBuf>>,
    next_changelist: Cell<u64>,
    fail_verb: RefCell<Option<String>>,
    calls: RefCell<Vec<String>>,
}

impl Default for FakeTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            workspace: workspace(),
            opened: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            unknown: RefCell::new(HashSet::new()),
            next_changelist: Cell::new(100),
            fail_verb: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_pending(self, id: &str, description: &str) -> Self {
        self.pending.borrow_mut().push(PendingChangelist {
            id: ChangelistId::new(id),
            description: description.to_string(),
        });
        self
    }

    pub fn with_opened(self, local: &str, changelist: &str) -> Self {
        self.opened.borrow_mut().push(OpenedFile {
            depot_path: depot_path(Path::new(local)),
            changelist: ChangelistId::new(changelist),
        });
        self
    }

    /// `fstat` will not find `local` in the depot.
    pub fn unknown_to_depot(self, local: &str) -> Self {
        self.unknown.borrow_mut().insert(PathBuf::from(local));
        self
    }

    /// Every call whose first word is `verb` fails.
    pub fn fail_on(self, verb: &str) -> Self {
        *self.fail_verb.borrow_mut() = Some(verb.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls that change workspace state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| {
                let verb = c.split_whitespace().next().unwrap_or("");
                MUTATING.contains(&verb)
            })
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> Vec<PendingChangelist> {
        self.pending.borrow().clone()
    }

    pub fn opened(&self) -> Vec<OpenedFile> {
        self.opened.borrow().clone()
    }

    fn record(&self, call: String) -> Result<(), P4Error> {
        let verb = call.split_whitespace().next().unwrap_or("").to_string();
        self.calls.borrow_mut().push(call);
        if self.fail_verb.borrow().as_deref() == Some(verb.as_str()) {
            return Err(P4Error::CommandFailed {
                exit_code: 1,
                message: format!("simulated {} failure", verb),
            });
        }
        Ok(())
    }

    fn open_depot(&self, depot: String, changelist: &str) {
        let mut opened = self.opened.borrow_mut();
        opened.retain(|f| f.depot_path != depot);
        opened.push(OpenedFile {
            depot_path: depot,
            changelist: ChangelistId::new(changelist),
        });
    }
}

impl TargetRepository for FakeTarget {
    async fn info(&self) -> Result<WorkspaceContext, P4Error> {
        self.record("info".into())?;
        Ok(self.workspace.clone())
    }

    async fn opened_files(
        &self,
        changelist: Option<&ChangelistId>,
    ) -> Result<Vec<OpenedFile>, P4Error> {
        match changelist {
            Some(id) => self.record(format!("opened -c {}", id))?,
            None => self.record("opened".into())?,
        }
        Ok(self
            .opened
            .borrow()
            .iter()
            .filter(|f| changelist.map_or(true, |id| &f.changelist == id))
            .cloned()
            .collect())
    }

    async fn map_to_local(&self, depot_paths: &[String]) -> Result<Vec<FileMapping>, P4Error> {
        self.record(format!("where {}", depot_paths.join(" ")))?;
        Ok(depot_paths
            .iter()
            .map(|d| FileMapping {
                depot_path: d.clone(),
                local_path: local_path(d),
            })
            .collect())
    }

    async fn pending_changelists(
        &self,
        client: &str,
    ) -> Result<Vec<PendingChangelist>, P4Error> {
        self.record(format!("changes -c {}", client))?;
        Ok(self.pending())
    }

    async fn fstat(&self, local_paths: &[PathBuf]) -> Result<Vec<Option<String>>, P4Error> {
        self.record(format!(
            "fstat {}",
            join(local_paths.iter().map(|p| p.display().to_string()))
        ))?;
        let unknown = self.unknown.borrow();
        Ok(local_paths
            .iter()
            .map(|p| (!unknown.contains(p)).then(|| depot_path(p)))
            .collect())
    }

    async fn create_changelist(&self, spec: &ChangelistSpec) -> Result<ChangelistId, P4Error> {
        self.record(format!("change -i {}", spec.description.trim()))?;
        let id = ChangelistId::new(self.next_changelist.get().to_string());
        self.next_changelist.set(self.next_changelist.get() + 1);
        self.pending.borrow_mut().push(PendingChangelist {
            id: id.clone(),
            description: format!("{}\n", spec.description.trim()),
        });
        Ok(id)
    }

    async fn open(
        &self,
        action: OpenAction,
        files: &[String],
        changelist: Option<&ChangelistId>,
    ) -> Result<(), P4Error> {
        self.record(format!("{} {}", action.verb(), files.join(" ")))?;
        let target = changelist.map_or("default", |id| id.as_str());
        for file in files {
            self.open_depot(depot_path(Path::new(file)), target);
        }
        Ok(())
    }

    async fn edit_keeping_local(&self, depot: &str) -> Result<(), P4Error> {
        self.record(format!("edit -k {}", depot))?;
        self.open_depot(depot.to_string(), "default");
        Ok(())
    }

    async fn rename_keeping_local(&self, from: &Path, to: &Path) -> Result<(), P4Error> {
        self.record(format!("move -k {} {}", from.display(), to.display()))?;
        self.open_depot(depot_path(to), "default");
        Ok(())
    }

    async fn reopen(&self, files: &[String], changelist: &ChangelistId) -> Result<(), P4Error> {
        self.record(format!("reopen -c {} {}", changelist, files.join(" ")))?;
        for file in files {
            let depot = if file.starts_with("//") {
                file.clone()
            } else {
                depot_path(Path::new(file))
            };
            self.open_depot(depot, changelist.as_str());
        }
        Ok(())
    }

    async fn shelve(&self, changelist: &ChangelistId) -> Result<(), P4Error> {
        self.record(format!("shelve -r -c {}", changelist))
    }

    async fn revert_keeping_local(
        &self,
        changelist: &ChangelistId,
        scope: &str,
    ) -> Result<(), P4Error> {
        self.record(format!("revert -k -c {} {}", changelist, scope))?;
        self.opened
            .borrow_mut()
            .retain(|f| &f.changelist != changelist);
        Ok(())
    }
}
