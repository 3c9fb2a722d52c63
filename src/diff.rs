// src/diff.rs

//! Entry diffs between two generations

use crate::error::Result;
use crate::store::{GenerationId, Store};
use std::collections::HashSet;

/// What a handler must add and remove to go from one generation to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDiff {
    /// Entries in the target but not the source, in target order
    pub to_add: Vec<String>,
    /// Entries in the source but not the target, in source order
    pub to_remove: Vec<String>,
}

impl EntryDiff {
    /// Compare two entry lists
    pub fn between(from: &[String], to: &[String]) -> Self {
        let from_set: HashSet<&str> = from.iter().map(String::as_str).collect();
        let to_set: HashSet<&str> = to.iter().map(String::as_str).collect();

        Self {
            to_add: to
                .iter()
                .filter(|e| !from_set.contains(e.as_str()))
                .cloned()
                .collect(),
            to_remove: from
                .iter()
                .filter(|e| !to_set.contains(e.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff a handler's entries between generations `from` and `to`
pub fn diff(store: &Store, from: GenerationId, to: GenerationId, handler: &str) -> Result<EntryDiff> {
    let from_entries = store.entries(from, handler)?;
    let to_entries = store.entries(to, handler)?;
    Ok(EntryDiff::between(&from_entries, &to_entries))
}
