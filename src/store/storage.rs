// src/store/storage.rs

//! Per-generation key/value storage
//!
//! Values live at `<generation>/storage/<namespace>/<key>`, one line per
//! element. Hooks and scripts use it to attach data to a generation.

use super::{EMPTY_GENERATION, GenerationId, STORAGE_DIR, Store};
use crate::error::{Error, Result};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Namespaces and keys become path components, so only plain names pass
fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Store {
    fn namespace_dir(&self, id: GenerationId, namespace: &str) -> Result<PathBuf> {
        check_name(namespace)?;
        let dir = self.path(id).ok_or(Error::GenerationNotFound(id))?;
        Ok(dir.join(STORAGE_DIR).join(namespace))
    }

    /// Store `lines` under `namespace/key`
    ///
    /// A value whose first line is empty (or no value at all) deletes the
    /// key, and the namespace with it once nothing else is left.
    pub fn storage_put(
        &self,
        id: GenerationId,
        namespace: &str,
        key: &str,
        lines: &[String],
    ) -> Result<()> {
        if id == EMPTY_GENERATION {
            return Err(Error::ProtectedGeneration {
                id,
                reason: "the empty generation has no storage".to_string(),
            });
        }
        check_name(key)?;
        let ns_dir = self.namespace_dir(id, namespace)?;
        let key_path = ns_dir.join(key);

        let has_value = lines.first().is_some_and(|line| !line.is_empty());
        if has_value {
            fs::create_dir_all(&ns_dir)?;
            let mut content = lines.join("\n");
            content.push('\n');
            fs::write(&key_path, content)?;
            debug!("Stored {}/{} in generation {}", namespace, key, id);
            return Ok(());
        }

        match fs::remove_file(&key_path) {
            Ok(()) => debug!("Removed {}/{} from generation {}", namespace, key, id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if ns_dir.is_dir() && fs::read_dir(&ns_dir)?.next().is_none() {
            fs::remove_dir(&ns_dir)?;
        }
        Ok(())
    }

    /// Read `namespace/key`; `None` when the key is not set
    pub fn storage_get(
        &self,
        id: GenerationId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<String>>> {
        check_name(key)?;
        let key_path = self.namespace_dir(id, namespace)?.join(key);
        match fs::read_to_string(&key_path) {
            Ok(text) => Ok(Some(text.lines().map(str::to_string).collect())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
