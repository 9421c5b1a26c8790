//! Lookup of pending changelists by description.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{ChangelistId, PendingChangelist};

/// Maps a trimmed description to the pending changelist carrying it.
#[derive(Debug, Default)]
pub struct ReuseIndex {
    by_description: HashMap<String, ChangelistId>,
}

impl ReuseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the client's pending changelists. When several share a
    /// description, the lowest changelist number wins.
    pub fn from_pending(mut pending: Vec<PendingChangelist>) -> Self {
        pending.sort_by_key(|cl| (cl.id.number().unwrap_or(u64::MAX), cl.id.clone()));
        let mut index = Self::new();
        for cl in pending {
            if let Some(existing) = index.by_description.get(cl.description.trim()) {
                warn!(
                    changelist = %cl.id,
                    kept = %existing,
                    "duplicate pending changelist description, ignoring"
                );
                continue;
            }
            index.register(&cl.description, cl.id);
        }
        debug!(count = index.len(), "indexed pending changelists");
        index
    }

    pub fn lookup(&self, message: &str) -> Option<&ChangelistId> {
        self.by_description.get(message.trim())
    }

    /// Add a changelist unless its description is already taken.
    pub fn register(&mut self, description: &str, id: ChangelistId) {
        self.by_description
            .entry(description.trim().to_string())
            .or_insert(id);
    }

    pub fn len(&self) -> usize {
        self.by_description.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_description.is_empty()
    }
}
