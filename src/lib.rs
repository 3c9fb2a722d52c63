// src/lib.rs

//! gensync
//!
//! Declarative system state in numbered generations. A repository of plain
//! text entry files (one package name per line, and so on) is built into an
//! immutable generation; switching applies the difference between two
//! generations through user-configured handlers that wrap package managers
//! and similar tools.
//!
//! # Architecture
//!
//! - Store: generations are directories, `current` and `latest` are pointers
//! - Builder: repository files become a new generation, deduplicated by hash
//! - Diff: per-handler added and removed entries between two generations
//! - Switch: fail-fast reconciliation, rollback and repair
//! - Handler runtime: shell commands behind a pluggable runner, with dry run

pub mod builder;
pub mod config;
pub mod diff;
mod error;
pub mod handler;
pub mod store;
pub mod switch;

pub use error::{Error, ErrorKind, Result};
