// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of failures, used by the CLI to pick an exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad user input: selectors, handler names, configuration files
    Configuration,
    /// Operations rejected to protect store invariants
    Consistency,
    /// An external command exited non-zero
    Command,
    /// Filesystem failures
    Io,
}

/// Core error types for gensync
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generation selector is malformed or names a missing generation
    #[error("Generation '{0}' is invalid or does not exist")]
    InvalidGeneration(String),

    /// Handler name not present in the configuration
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    /// Generation id does not exist in the store
    #[error("Generation {0} does not exist")]
    GenerationNotFound(u32),

    /// Generation id is already taken
    #[error("Generation {0} already exists")]
    GenerationExists(u32),

    /// Deleting or writing to a generation that must not change
    #[error("Generation {id} is protected: {reason}")]
    ProtectedGeneration { id: u32, reason: String },

    /// Switching to the generation the system is already on
    #[error("Generation {0} is already the current generation")]
    AlreadyCurrent(u32),

    /// Not enough generations older than current
    #[error("Not enough generations to rollback {depth} generation(s) ago")]
    RollbackOutOfRange { depth: usize },

    /// External command exited non-zero
    #[error("Handler {handler}: {step} command failed ({status}): {command}")]
    CommandFailed {
        handler: String,
        step: String,
        command: String,
        status: String,
    },

    /// Setup steps are defined but no guard matched
    #[error("Handler {0}: no setup step matched this system")]
    NoSetupMatch(String),

    /// Store lock could not be acquired
    #[error("Failed to lock generation store at {}", .0.display())]
    LockFailed(PathBuf),

    /// Store root has not been initialized
    #[error("Generation store not found at path: {}", .0.display())]
    StoreNotFound(PathBuf),

    /// Store metadata is unreadable or violates an invariant
    #[error("Corrupt generation store: {0}")]
    CorruptStore(String),

    /// Storage namespace or key is not a plain name
    #[error("Invalid storage name: {0:?}")]
    InvalidName(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::InvalidGeneration(_) | Error::UnknownHandler(_) => {
                ErrorKind::Configuration
            }
            Error::InvalidName(_) => ErrorKind::Configuration,
            Error::GenerationNotFound(_)
            | Error::GenerationExists(_)
            | Error::ProtectedGeneration { .. }
            | Error::AlreadyCurrent(_)
            | Error::RollbackOutOfRange { .. } => ErrorKind::Consistency,
            Error::CommandFailed { .. } | Error::NoSetupMatch(_) => ErrorKind::Command,
            Error::Io(_)
            | Error::LockFailed(_)
            | Error::StoreNotFound(_)
            | Error::CorruptStore(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias using gensync's Error type
pub type Result<T> = std::result::Result<T, Error>;
