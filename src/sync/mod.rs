pub mod dispatch;
pub mod engine;
pub mod walk;

pub use dispatch::{transfer, Dispatcher, TransferMode};
pub use engine::{EngineState, SyncEngine, UploadSpec, CHECKPOINT_EVERY};
pub use walk::{source_files, SourceFile};

use std::time::Duration;

/// Counters for one session, across all uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Files that matched a pattern and were hashed.
    pub files_considered: usize,
    pub files_transferred: usize,
    pub text_files: usize,
    pub binary_files: usize,
    pub files_unchanged: usize,
    /// Files no pattern selected.
    pub files_unmatched: usize,
    /// Files dropped by the only/skip filters.
    pub files_filtered: usize,
    pub bytes_transferred: u64,
    pub files_deleted: usize,
    /// Deletions skipped because the remote directory does not exist.
    pub deletes_skipped: usize,
    pub delete_failures: usize,
    pub dirs_created: u64,
    pub checkpoints: usize,
    pub duration: Duration,
}
