// src/store/maintenance.rs

//! Store housekeeping: closing numbering gaps and collapsing duplicates
//!
//! Both operations support a dry run that reports exactly what a real run
//! would do, pointer moves included, without touching the disk.

use super::{GenerationId, Store};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::info;

/// One generation moved by `align`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renumbering {
    pub from: GenerationId,
    pub to: GenerationId,
    /// `current` followed the generation
    pub current: bool,
    /// `latest` followed the generation
    pub latest: bool,
}

/// One generation removed by `delete_dups`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduplication {
    pub deleted: GenerationId,
    pub kept: GenerationId,
    /// `current` was moved to the kept generation
    pub current: bool,
    /// `latest` was moved to the kept generation
    pub latest: bool,
}

impl Store {
    /// Renumber generations so ids run 0, 1, 2, ... without gaps
    ///
    /// Renames happen in ascending order, so a generation is only ever moved
    /// into an id that has already been vacated.
    pub fn align(&self, dry_run: bool) -> Result<Vec<Renumbering>> {
        let current = self.current()?;
        let latest = self.latest()?;
        let mut moves = Vec::new();

        for (index, id) in self.list()?.into_iter().enumerate() {
            let target = index as GenerationId;
            if id == target {
                continue;
            }

            let step = Renumbering {
                from: id,
                to: target,
                current: id == current,
                latest: id == latest,
            };
            info!("{} -> {}", id, target);

            if !dry_run {
                self.renumber(id, target)?;
                if step.current {
                    self.set_current(target)?;
                }
                if step.latest {
                    self.set_latest(target)?;
                }
            }
            if step.current {
                info!("current -> {}", target);
            }
            if step.latest {
                info!("latest -> {}", target);
            }
            moves.push(step);
        }

        Ok(moves)
    }

    /// Delete generations whose content hash matches a newer generation
    ///
    /// Within each group of identical hashes the highest id survives. A
    /// pointer that refers to a doomed generation is moved to the survivor
    /// just before the deletion, based on where the pointer is at that moment.
    pub fn delete_dups(&self, dry_run: bool) -> Result<Vec<Deduplication>> {
        let mut groups: BTreeMap<String, Vec<GenerationId>> = BTreeMap::new();
        for id in self.list()? {
            let hash = self.hash(id)?;
            if hash.is_empty() {
                continue;
            }
            groups.entry(hash).or_default().push(id);
        }

        let mut groups: Vec<Vec<GenerationId>> =
            groups.into_values().filter(|ids| ids.len() > 1).collect();
        groups.sort_by_key(|ids| ids[0]);

        // A dry run tracks the pointers in memory instead of on disk
        let mut current = self.current()?;
        let mut latest = self.latest()?;
        let mut deletions = Vec::new();

        for ids in groups {
            let Some((&kept, doomed)) = ids.split_last() else {
                continue;
            };
            for &id in doomed {
                if !dry_run {
                    current = self.current()?;
                    latest = self.latest()?;
                }

                let step = Deduplication {
                    deleted: id,
                    kept,
                    current: id == current,
                    latest: id == latest,
                };

                if step.current {
                    if !dry_run {
                        self.set_current(kept)?;
                    }
                    current = kept;
                    info!("current -> {}", kept);
                }
                if step.latest {
                    if !dry_run {
                        self.set_latest(kept)?;
                    }
                    latest = kept;
                    info!("latest -> {}", kept);
                }

                if !dry_run {
                    self.delete(id)?;
                }
                info!(
                    "Deleted generation {} because it is identical to generation {}",
                    id, kept
                );
                deletions.push(step);
            }
        }

        Ok(deletions)
    }
}
