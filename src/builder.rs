// src/builder.rs

//! Building generations from a repository of entry files
//!
//! A handler named `apt_pkgs` collects every repository file whose name starts
//! with `apt_pkgs` (for example `apt_pkgs`, `apt_pkgs.dev`) plus every file
//! starting with `<hostname>_apt_pkgs`, which lets one repository serve
//! several machines. Symlinked files are followed. Every line is trimmed of
//! surrounding whitespace, so `  # note` counts as a comment and ` vim` is
//! stored as `vim`. Blank lines and `#` comments are dropped, the rest is
//! merged, sorted and deduplicated.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{GenerationId, Store};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new generation was recorded and `latest` now points to it
    Created { id: GenerationId, hash: String },
    /// The sources matched the latest generation; nothing was kept
    Unchanged { latest: GenerationId },
}

/// Repository files contributing to `handler`, sorted by name
pub fn matching_files(source: &Path, handler: &str, hostname: &str) -> Result<Vec<PathBuf>> {
    let host_prefix = format!("{}_{}", hostname, handler);
    let mut files = Vec::new();

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !fs::metadata(entry.path())?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        if name.starts_with(handler) || (!hostname.is_empty() && name.starts_with(&host_prefix)) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Meaningful lines of one entry file
fn read_entry_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Canonical entry list for a handler; `None` when no file matched
pub fn collect_entries(source: &Path, handler: &str, hostname: &str) -> Result<Option<Vec<String>>> {
    let files = matching_files(source, handler, hostname)?;
    if files.is_empty() {
        return Ok(None);
    }

    let mut entries = Vec::new();
    for file in &files {
        info!("+ include file {}", file.display());
        entries.extend(read_entry_lines(file)?);
    }
    entries.sort();
    entries.dedup();
    Ok(Some(entries))
}

/// Running content hash of a generation
///
/// Fed handler by handler in configuration order with already sorted entries,
/// so two builds over the same content always produce the same digest.
#[derive(Clone, Default)]
pub struct GenerationHasher {
    hasher: Sha256,
}

impl GenerationHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one handler's entries; handlers without entries contribute nothing
    pub fn update(&mut self, handler: &str, entries: &[String]) {
        if entries.is_empty() {
            return;
        }
        // The handler name keeps identical entries under different handlers apart
        self.hasher.update(b"[");
        self.hasher.update(handler.as_bytes());
        self.hasher.update(b"]\n");
        for entry in entries {
            self.hasher.update(entry.as_bytes());
            self.hasher.update(b"\n");
        }
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Build a new generation from the files in `repo`
///
/// The generation is discarded again when its hash equals the hash of the
/// latest generation.
pub fn build(
    store: &Store,
    config: &Config,
    repo: &Path,
    hostname: &str,
    comment: &str,
) -> Result<BuildOutcome> {
    let id = store.next_id()?;
    store.create(id, comment)?;
    info!("System hostname is {}", hostname);

    match populate(store, config, repo, hostname, id) {
        Ok(hash) => {
            let latest = store.latest()?;
            if hash == store.hash(latest)? {
                store.discard(id)?;
                info!("No difference with the latest generation, build removed");
                return Ok(BuildOutcome::Unchanged { latest });
            }

            store.set_latest(id)?;
            info!("Done building generation {}", id);
            Ok(BuildOutcome::Created { id, hash })
        }
        Err(e) => {
            if let Err(cleanup) = store.discard(id) {
                warn!("Could not remove partial generation {}: {}", id, cleanup);
            }
            Err(e)
        }
    }
}

fn populate(
    store: &Store,
    config: &Config,
    repo: &Path,
    hostname: &str,
    id: GenerationId,
) -> Result<String> {
    if !repo.is_dir() {
        return Err(Error::Config(format!(
            "repository {} is not a directory",
            repo.display()
        )));
    }

    let mut hasher = GenerationHasher::new();
    for handler in &config.handlers {
        info!("Handler {} :: build", handler.name);
        let Some(entries) = collect_entries(repo, &handler.name, hostname)? else {
            debug!("No files for handler {}", handler.name);
            continue;
        };
        store.write_entries(id, &handler.name, &entries)?;
        hasher.update(&handler.name, &entries);
    }

    let hash = hasher.finish();
    store.set_hash(id, &hash)?;
    Ok(hash)
}
