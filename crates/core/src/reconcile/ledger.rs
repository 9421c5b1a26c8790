//! In-run record of which files are open, and for whom.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::ChangelistId;

/// Who holds an open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Holder {
    /// Already open in a pending changelist when the run started.
    Pending(ChangelistId),
    /// Claimed by a commit converted in this run. `changelist` is unknown
    /// until the changelist exists (never, under dry-run).
    Commit {
        revision: String,
        changelist: Option<ChangelistId>,
    },
}

impl Holder {
    pub fn changelist(&self) -> Option<&ChangelistId> {
        match self {
            Self::Pending(id) => Some(id),
            Self::Commit { changelist, .. } => changelist.as_ref(),
        }
    }
}

/// Every local path known to be open in some pending changelist, plus every
/// path this run has claimed.
#[derive(Debug, Default)]
pub struct OpenFileLedger {
    entries: BTreeMap<PathBuf, Holder>,
}

impl OpenFileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file found open before the run started.
    pub fn seed(&mut self, path: PathBuf, changelist: ChangelistId) {
        self.entries.insert(path, Holder::Pending(changelist));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn holder(&self, path: &Path) -> Option<&Holder> {
        self.entries.get(path)
    }

    /// Paths from `paths` held by anyone but `reusing`.
    pub fn conflicts(&self, paths: &[PathBuf], reusing: Option<&ChangelistId>) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|path| match self.entries.get(*path) {
                None => false,
                Some(holder) => reusing.is_none() || holder.changelist() != reusing,
            })
            .cloned()
            .collect()
    }

    /// Claim `paths` for `revision`. Nothing is recorded if any path is
    /// held elsewhere; the conflicting paths are returned instead.
    pub fn claim(
        &mut self,
        paths: &[PathBuf],
        revision: &str,
        changelist: Option<&ChangelistId>,
    ) -> Result<(), Vec<PathBuf>> {
        let conflicts = self.conflicts(paths, changelist);
        if !conflicts.is_empty() {
            return Err(conflicts);
        }
        self.record(paths, revision, changelist);
        Ok(())
    }

    /// Record `paths` for `revision` without looking at current holders.
    pub fn record(&mut self, paths: &[PathBuf], revision: &str, changelist: Option<&ChangelistId>) {
        for path in paths {
            self.entries.insert(
                path.clone(),
                Holder::Commit {
                    revision: revision.to_string(),
                    changelist: changelist.cloned(),
                },
            );
        }
    }

    /// Attach a freshly created changelist to the paths `revision` claimed.
    pub fn attach(&mut self, revision: &str, id: &ChangelistId) {
        for holder in self.entries.values_mut() {
            if let Holder::Commit {
                revision: claimed_by,
                changelist,
            } = holder
            {
                if claimed_by == revision {
                    *changelist = Some(id.clone());
                }
            }
        }
    }
}
