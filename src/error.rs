use crate::remote::SessionError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read ledger {path}: {source}")]
    LedgerRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed ledger {path} (line {line}): {reason}")]
    LedgerFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Failed to write ledger {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Ledger {0} is in use by another session")]
    LedgerLocked(PathBuf),

    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create remote directory '{dir}': {source}")]
    CreateDir {
        dir: String,
        #[source]
        source: SessionError,
    },

    #[error("Failed to upload {path}: {source}")]
    Transfer {
        path: String,
        #[source]
        source: SessionError,
    },

    #[error("Remote session error: {0}")]
    Session(#[from] SessionError),

    #[error("{operation} is not allowed while the engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
