// src/store/pointer.rs

//! Named generation pointers (`current`, `latest`)
//!
//! A pointer is a one-line file holding a generation id. Updates go through a
//! temporary file in the store root followed by an atomic rename, so readers
//! see either the old or the new id.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use super::GenerationId;

/// Pointer to the generation the live system matches
pub const CURRENT: &str = "current";

/// Pointer to the most recently built generation
pub const LATEST: &str = "latest";

/// Read the generation id a pointer refers to
pub(crate) fn read(root: &Path, name: &str) -> Result<GenerationId> {
    let path = root.join(name);
    let text = fs::read_to_string(&path).map_err(|e| {
        Error::CorruptStore(format!("cannot read pointer '{}': {}", name, e))
    })?;
    text.trim()
        .parse()
        .map_err(|_| Error::CorruptStore(format!("pointer '{}' holds {:?}", name, text.trim())))
}

/// Atomically replace a pointer's target
pub(crate) fn write(root: &Path, name: &str, id: GenerationId) -> Result<()> {
    let mut temp = NamedTempFile::new_in(root)?;
    writeln!(temp, "{}", id)?;
    temp.as_file().sync_all()?;
    temp.persist(root.join(name)).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
