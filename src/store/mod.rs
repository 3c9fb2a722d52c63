// src/store/mod.rs

//! Generation store
//!
//! The store is a directory holding one numbered sub-directory per generation
//! plus the `current` and `latest` pointers:
//!
//! ```text
//! <root>/
//!   0/                      empty baseline, never deleted
//!   1/
//!     apt_pkgs              one sorted entry per line
//!     _comment
//!     _hash
//!     _created
//!     storage/<ns>/<key>
//!   current
//!   latest
//!   .setup-<handler>
//!   .lock
//! ```
//!
//! Both pointers always resolve to an existing generation. Operations that
//! would break this either fail before touching the disk or move the pointer
//! first.

pub mod lock;
mod maintenance;
pub mod pointer;
mod storage;

pub use lock::{LockMode, StoreLock};
pub use maintenance::{Deduplication, Renumbering};
pub use pointer::{CURRENT, LATEST};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Generation identifier
pub type GenerationId = u32;

/// The empty baseline generation
pub const EMPTY_GENERATION: GenerationId = 0;

/// Comment given to generation 0 when a store is initialized
pub const EMPTY_GENERATION_COMMENT: &str = "Empty generation (automatically created)";

pub const COMMENT_FILE: &str = "_comment";
pub const HASH_FILE: &str = "_hash";
pub const CREATED_FILE: &str = "_created";
pub const STORAGE_DIR: &str = "storage";
const SETUP_MARKER_PREFIX: &str = ".setup-";

/// A generation argument as typed by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Current,
    Latest,
    Id(GenerationId),
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            CURRENT => Ok(Selector::Current),
            LATEST => Ok(Selector::Latest),
            _ if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse()
                .map(Selector::Id)
                .map_err(|_| Error::InvalidGeneration(s.to_string())),
            _ => Err(Error::InvalidGeneration(s.to_string())),
        }
    }
}

/// One row of `gensync list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub id: GenerationId,
    pub comment: Option<String>,
    pub hash: Option<String>,
    pub created: Option<String>,
    pub current: bool,
    pub latest: bool,
}

/// On-disk collection of generations
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Initialize a store at `root`
    ///
    /// Creates the root directory, generation 0 and both pointers when they
    /// are missing. Calling it on an existing store is safe.
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
        };

        if !store.exists(EMPTY_GENERATION) {
            store.create(EMPTY_GENERATION, EMPTY_GENERATION_COMMENT)?;
            info!("Initialized generations directory at {}", root.display());
        }
        if !root.join(CURRENT).exists() {
            store.set_current(EMPTY_GENERATION)?;
        }
        if !root.join(LATEST).exists() {
            store.set_latest(EMPTY_GENERATION)?;
        }

        store.check_pointers()?;
        Ok(store)
    }

    /// Open an existing store
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
        };
        if !store.exists(EMPTY_GENERATION) {
            return Err(Error::StoreNotFound(root.to_path_buf()));
        }
        store.check_pointers()?;
        Ok(store)
    }

    /// Open the store, initializing it first if needed
    pub fn open_or_init(root: &Path) -> Result<Self> {
        if root.join(EMPTY_GENERATION.to_string()).is_dir() {
            Self::open(root)
        } else {
            Self::init(root)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take the store lock for the duration of a command
    pub fn lock(&self, mode: LockMode) -> Result<StoreLock> {
        StoreLock::acquire(&self.root, mode)
    }

    fn dir(&self, id: GenerationId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Create the directory for generation `id`
    pub fn create(&self, id: GenerationId, comment: &str) -> Result<PathBuf> {
        let dir = self.dir(id);
        if dir.exists() {
            return Err(Error::GenerationExists(id));
        }
        fs::create_dir(&dir)?;

        let comment = comment.trim();
        if !comment.is_empty() {
            fs::write(dir.join(COMMENT_FILE), format!("{}\n", comment))?;
        }
        fs::write(dir.join(CREATED_FILE), format!("{}\n", Utc::now().to_rfc3339()))?;

        debug!("Created generation {} at {}", id, dir.display());
        Ok(dir)
    }

    pub fn exists(&self, id: GenerationId) -> bool {
        self.dir(id).is_dir()
    }

    /// Path of generation `id`, if it exists
    pub fn path(&self, id: GenerationId) -> Option<PathBuf> {
        self.exists(id).then(|| self.dir(id))
    }

    fn require(&self, id: GenerationId) -> Result<PathBuf> {
        self.path(id).ok_or(Error::GenerationNotFound(id))
    }

    /// All generation ids in ascending order
    pub fn list(&self) -> Result<Vec<GenerationId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Only canonical names; "007" is not generation 7
            if let Ok(Selector::Id(id)) = name.parse::<Selector>()
                && id.to_string() == name
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Id for the next build
    pub fn next_id(&self) -> Result<GenerationId> {
        let highest = self.list()?.last().copied().unwrap_or(EMPTY_GENERATION);
        Ok(highest.max(self.latest()?) + 1)
    }

    pub fn current(&self) -> Result<GenerationId> {
        pointer::read(&self.root, CURRENT)
    }

    pub fn latest(&self) -> Result<GenerationId> {
        pointer::read(&self.root, LATEST)
    }

    pub fn set_current(&self, id: GenerationId) -> Result<()> {
        self.set_pointer(CURRENT, id)
    }

    pub fn set_latest(&self, id: GenerationId) -> Result<()> {
        self.set_pointer(LATEST, id)
    }

    fn set_pointer(&self, name: &str, id: GenerationId) -> Result<()> {
        self.require(id)?;
        pointer::write(&self.root, name, id)?;
        debug!("Pointer {} -> {}", name, id);
        Ok(())
    }

    /// Verify both pointers resolve, repairing `latest` if it dangles
    fn check_pointers(&self) -> Result<()> {
        let current = self.current()?;
        if !self.exists(current) {
            return Err(Error::CorruptStore(format!(
                "current points to missing generation {}",
                current
            )));
        }

        let latest = self.latest();
        if !matches!(latest, Ok(id) if self.exists(id)) {
            let highest = self.list()?.last().copied().unwrap_or(EMPTY_GENERATION);
            warn!("latest pointer was dangling, reset to generation {}", highest);
            self.set_latest(highest)?;
        }
        Ok(())
    }

    /// Resolve a selector string to an existing generation
    pub fn resolve(&self, selector: &str) -> Result<GenerationId> {
        let id = match selector.parse::<Selector>()? {
            Selector::Current => self.current()?,
            Selector::Latest => self.latest()?,
            Selector::Id(id) => id,
        };
        if !self.exists(id) {
            return Err(Error::InvalidGeneration(selector.to_string()));
        }
        Ok(id)
    }

    /// Content hash of a generation; empty for generation 0 or a missing file
    pub fn hash(&self, id: GenerationId) -> Result<String> {
        if id == EMPTY_GENERATION {
            return Ok(String::new());
        }
        Ok(self.read_first_line(id, HASH_FILE)?.unwrap_or_default())
    }

    pub fn set_hash(&self, id: GenerationId, hash: &str) -> Result<()> {
        if id == EMPTY_GENERATION {
            return Err(Error::ProtectedGeneration {
                id,
                reason: "the empty generation carries no hash".to_string(),
            });
        }
        let dir = self.require(id)?;
        fs::write(dir.join(HASH_FILE), format!("{}\n", hash))?;
        Ok(())
    }

    /// First line of the comment, empty if there is none
    pub fn comment(&self, id: GenerationId) -> Result<String> {
        Ok(self.read_first_line(id, COMMENT_FILE)?.unwrap_or_default())
    }

    /// Creation time, when recorded
    pub fn created(&self, id: GenerationId) -> Result<Option<DateTime<Utc>>> {
        let Some(text) = self.read_first_line(id, CREATED_FILE)? else {
            return Ok(None);
        };
        Ok(DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)))
    }

    fn read_first_line(&self, id: GenerationId, file: &str) -> Result<Option<String>> {
        let Some(dir) = self.path(id) else {
            return Ok(None);
        };
        match fs::read_to_string(dir.join(file)) {
            Ok(text) => Ok(text.lines().next().map(|l| l.trim_end().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Entries a handler has in a generation; a missing entry file is empty
    pub fn entries(&self, id: GenerationId, handler: &str) -> Result<Vec<String>> {
        let dir = self.require(id)?;
        match fs::read_to_string(dir.join(handler)) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a handler's entry file; entries must already be sorted and unique
    pub fn write_entries(&self, id: GenerationId, handler: &str, entries: &[String]) -> Result<()> {
        let dir = self.require(id)?;
        let mut out = BufWriter::new(File::create(dir.join(handler))?);
        for entry in entries {
            writeln!(out, "{}", entry)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Delete a generation
    ///
    /// Generation 0, the current generation and missing generations are
    /// refused without touching the disk. Deleting the latest generation first
    /// moves `latest` to the closest lower generation.
    pub fn delete(&self, id: GenerationId) -> Result<()> {
        if id == EMPTY_GENERATION {
            return Err(Error::ProtectedGeneration {
                id,
                reason: "deleting generation 0 is forbidden".to_string(),
            });
        }
        if id == self.current()? {
            return Err(Error::ProtectedGeneration {
                id,
                reason: "deleting the current generation is forbidden".to_string(),
            });
        }
        let dir = self.require(id)?;

        if id == self.latest()? {
            let previous = (0..id)
                .rev()
                .find(|g| self.exists(*g))
                .ok_or_else(|| Error::CorruptStore("generation 0 is missing".to_string()))?;
            self.set_latest(previous)?;
            info!("The latest generation is now {}", previous);
        }

        fs::remove_dir_all(&dir)?;
        info!("Deleted generation {}", id);
        Ok(())
    }

    /// Remove a generation no pointer refers to, e.g. a discarded build
    pub(crate) fn discard(&self, id: GenerationId) -> Result<()> {
        if id == EMPTY_GENERATION || id == self.current()? || id == self.latest()? {
            return Err(Error::ProtectedGeneration {
                id,
                reason: "generation is referenced".to_string(),
            });
        }
        if let Some(dir) = self.path(id) {
            fs::remove_dir_all(dir)?;
            debug!("Discarded generation {}", id);
        }
        Ok(())
    }

    /// Rename a generation; pointers are the caller's responsibility
    pub fn renumber(&self, old: GenerationId, new: GenerationId) -> Result<()> {
        let from = self.require(old)?;
        if self.exists(new) {
            return Err(Error::GenerationExists(new));
        }
        fs::rename(from, self.dir(new))?;
        debug!("Renumbered generation {} -> {}", old, new);
        Ok(())
    }

    /// Whether a handler's one-time setup has run against this store
    pub fn is_setup_done(&self, handler: &str) -> bool {
        self.setup_marker(handler).exists()
    }

    pub fn mark_setup_done(&self, handler: &str) -> Result<()> {
        File::create(self.setup_marker(handler))?;
        Ok(())
    }

    fn setup_marker(&self, handler: &str) -> PathBuf {
        self.root.join(format!("{}{}", SETUP_MARKER_PREFIX, handler))
    }

    /// Summaries of every generation, ascending
    pub fn summaries(&self) -> Result<Vec<GenerationSummary>> {
        let current = self.current()?;
        let latest = self.latest()?;
        self.list()?
            .into_iter()
            .map(|id| {
                let comment = self.comment(id)?;
                let hash = self.hash(id)?;
                Ok(GenerationSummary {
                    id,
                    comment: (!comment.is_empty()).then_some(comment),
                    hash: (!hash.is_empty()).then_some(hash),
                    created: self.created(id)?.map(|t| t.to_rfc3339()),
                    current: id == current,
                    latest: id == latest,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> (tempfile::TempDir, Store) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Store::init(&temp_dir.path().join("gens")).unwrap();
        (temp_dir, store)
    }

    fn add_generation(store: &Store, id: GenerationId, hash: &str) {
        store.create(id, "").unwrap();
        store.set_hash(id, hash).unwrap();
    }

    #[test]
    fn test_init_creates_empty_generation() {
        let (_temp, store) = create_test_store();
        assert_eq!(store.list().unwrap(), vec![0]);
        assert_eq!(store.current().unwrap(), 0);
        assert_eq!(store.latest().unwrap(), 0);
        assert_eq!(store.hash(0).unwrap(), "");
        assert_eq!(store.comment(0).unwrap(), EMPTY_GENERATION_COMMENT);
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 1, "aaa");
        store.set_current(1).unwrap();

        let reopened = Store::init(store.root()).unwrap();
        assert_eq!(reopened.current().unwrap(), 1);
        assert_eq!(reopened.list().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_open_missing_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = Store::open(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(Error::StoreNotFound(_))));
    }

    #[test]
    fn test_open_repairs_dangling_latest() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 1, "aaa");
        add_generation(&store, 2, "bbb");
        pointer::write(store.root(), LATEST, 9).unwrap();

        let reopened = Store::open(store.root()).unwrap();
        assert_eq!(reopened.latest().unwrap(), 2);
    }

    #[test]
    fn test_open_rejects_dangling_current() {
        let (_temp, store) = create_test_store();
        pointer::write(store.root(), CURRENT, 4).unwrap();
        assert!(matches!(Store::open(store.root()), Err(Error::CorruptStore(_))));
    }

    #[test]
    fn test_create_never_overwrites() {
        let (_temp, store) = create_test_store();
        store.create(1, "first").unwrap();
        assert!(matches!(store.create(1, "again"), Err(Error::GenerationExists(1))));
        assert_eq!(store.comment(1).unwrap(), "first");
    }

    #[test]
    fn test_comment_first_line_only() {
        let (_temp, store) = create_test_store();
        let dir = store.create(1, "").unwrap();
        assert_eq!(store.comment(1).unwrap(), "");
        fs::write(dir.join(COMMENT_FILE), "line one\nline two\n").unwrap();
        assert_eq!(store.comment(1).unwrap(), "line one");
    }

    #[test]
    fn test_list_ignores_non_generation_names() {
        let (_temp, store) = create_test_store();
        store.create(3, "").unwrap();
        store.create(10, "").unwrap();
        fs::create_dir(store.root().join("backup")).unwrap();
        fs::write(store.root().join("42"), "file, not a directory").unwrap();
        fs::create_dir(store.root().join("007")).unwrap();
        store.mark_setup_done("pkgs").unwrap();

        assert_eq!(store.list().unwrap(), vec![0, 3, 10]);
        assert!(!store.exists(7));
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("current".parse::<Selector>().unwrap(), Selector::Current);
        assert_eq!("latest".parse::<Selector>().unwrap(), Selector::Latest);
        assert_eq!("12".parse::<Selector>().unwrap(), Selector::Id(12));
        for bad in ["", "-1", "+3", "1.5", "Current", "abc", "99999999999"] {
            assert!(bad.parse::<Selector>().is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_resolve() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 1, "aaa");
        store.set_latest(1).unwrap();

        assert_eq!(store.resolve("current").unwrap(), 0);
        assert_eq!(store.resolve("latest").unwrap(), 1);
        assert_eq!(store.resolve("1").unwrap(), 1);
        assert!(matches!(store.resolve("5"), Err(Error::InvalidGeneration(_))));
        assert!(matches!(store.resolve("newest"), Err(Error::InvalidGeneration(_))));
    }

    #[test]
    fn test_pointer_must_target_existing_generation() {
        let (_temp, store) = create_test_store();
        assert!(matches!(store.set_current(3), Err(Error::GenerationNotFound(3))));
        assert_eq!(store.current().unwrap(), 0);
    }

    #[test]
    fn test_delete_protected_generations() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 1, "aaa");
        store.set_current(1).unwrap();

        assert!(matches!(store.delete(0), Err(Error::ProtectedGeneration { id: 0, .. })));
        assert!(matches!(store.delete(1), Err(Error::ProtectedGeneration { id: 1, .. })));
        assert!(matches!(store.delete(7), Err(Error::GenerationNotFound(7))));
        assert_eq!(store.list().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_delete_latest_moves_pointer_down() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 1, "aaa");
        add_generation(&store, 3, "ccc");
        add_generation(&store, 5, "eee");
        store.set_latest(5).unwrap();

        store.delete(5).unwrap();
        assert_eq!(store.latest().unwrap(), 3);
        assert_eq!(store.list().unwrap(), vec![0, 1, 3]);

        store.delete(3).unwrap();
        store.delete(1).unwrap();
        assert_eq!(store.latest().unwrap(), 0);
    }

    #[test]
    fn test_renumber() {
        let (_temp, store) = create_test_store();
        add_generation(&store, 4, "ddd");
        add_generation(&store, 2, "bbb");

        assert!(matches!(store.renumber(4, 2), Err(Error::GenerationExists(2))));
        store.renumber(4, 1).unwrap();
        assert_eq!(store.list().unwrap(), vec![0, 1, 2]);
        assert_eq!(store.hash(1).unwrap(), "ddd");
    }

    #[test]
    fn test_entries_round_trip_and_missing_file() {
        let (_temp, store) = create_test_store();
        store.create(1, "").unwrap();
        let entries = vec!["curl".to_string(), "vim".to_string()];
        store.write_entries(1, "pkgs", &entries).unwrap();

        assert_eq!(store.entries(1, "pkgs").unwrap(), entries);
        assert!(store.entries(1, "flatpak").unwrap().is_empty());
        assert!(store.entries(0, "pkgs").unwrap().is_empty());
    }

    #[test]
    fn test_setup_markers() {
        let (_temp, store) = create_test_store();
        assert!(!store.is_setup_done("flatpak"));
        store.mark_setup_done("flatpak").unwrap();
        assert!(store.is_setup_done("flatpak"));
        assert!(store.root().join(".setup-flatpak").exists());
    }

    #[test]
    fn test_summaries() {
        let (_temp, store) = create_test_store();
        store.create(1, "add editors").unwrap();
        store.set_hash(1, "abc").unwrap();
        store.set_latest(1).unwrap();

        let summaries = store.summaries().unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].current);
        assert_eq!(summaries[0].hash, None);
        assert!(summaries[1].latest);
        assert_eq!(summaries[1].comment.as_deref(), Some("add editors"));
        assert_eq!(summaries[1].hash.as_deref(), Some("abc"));
        assert!(summaries[1].created.is_some());
    }
}
