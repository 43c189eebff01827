//! Sync engine.
//!
//! Drives a session through `Idle -> Uploading -> Reconciling -> Finished`:
//! any number of uploads, at most one pass deleting files that disappeared
//! locally, then a finish that closes the session and writes the ledger.

use crate::error::{Result, SyncError};
use crate::ledger::{Fingerprint, FingerprintLedger};
use crate::remote::{split_file_path, RemoteCursor, RemoteSession};
use crate::sync::dispatch::{compile, file_name, transfer, Dispatcher, TransferMode};
use crate::sync::walk::source_files;
use crate::sync::SyncStats;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// Changed files between two ledger checkpoints.
pub const CHECKPOINT_EVERY: usize = 30;

/// One upload: a local tree, where it goes, and which files are sent how.
#[derive(Debug, Clone, Default)]
pub struct UploadSpec {
    /// Remote directory made the session root before uploading.
    pub host_dir: Option<String>,
    pub source: PathBuf,
    pub text: Vec<String>,
    pub binary: Vec<String>,
    /// Only consider files whose name matches.
    pub only: Option<String>,
    /// Never consider files whose name matches.
    pub skip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Uploading,
    Reconciling,
    Finished,
}

impl EngineState {
    fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Uploading => "uploading",
            EngineState::Reconciling => "reconciling",
            EngineState::Finished => "finished",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SyncEngine<S> {
    cursor: RemoteCursor<S>,
    ledger: FingerprintLedger,
    state: EngineState,
    checkpoint_every: usize,
    changed: usize,
    stats: SyncStats,
    started: Instant,
}

impl<S: RemoteSession> SyncEngine<S> {
    pub fn new(session: S, ledger: FingerprintLedger) -> Self {
        Self {
            cursor: RemoteCursor::new(session),
            ledger,
            state: EngineState::Idle,
            checkpoint_every: CHECKPOINT_EVERY,
            changed: 0,
            stats: SyncStats::default(),
            started: Instant::now(),
        }
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every.max(1);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn ledger(&self) -> &FingerprintLedger {
        &self.ledger
    }

    fn invalid(&self, operation: &'static str) -> SyncError {
        SyncError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    /// Upload every changed file of `spec.source`.
    ///
    /// May be called repeatedly; all calls share one ledger, so deletions are
    /// computed against everything considered by any of them. The changed-file
    /// count that drives checkpoints is kept across calls.
    pub async fn upload(&mut self, spec: &UploadSpec) -> Result<()> {
        if !matches!(self.state, EngineState::Idle | EngineState::Uploading) {
            return Err(self.invalid("upload"));
        }
        self.state = EngineState::Uploading;

        let dispatcher = Dispatcher::new(spec.text.as_slice(), spec.binary.as_slice())?;
        let only = spec.only.as_deref().map(compile).transpose()?;
        let skip = spec.skip.as_deref().map(compile).transpose()?;

        if let Some(dir) = spec.host_dir.as_deref().filter(|d| !matches!(*d, "" | ".")) {
            self.cursor.set_root(dir).await?;
        }

        let files = source_files(&spec.source)?;
        tracing::info!(
            source = %spec.source.display(),
            candidates = files.len(),
            "scanning for changes"
        );

        for file in files {
            let name = file_name(&file.relative);
            if only.as_ref().map_or(false, |p| !p.matches(name))
                || skip.as_ref().map_or(false, |p| p.matches(name))
            {
                self.stats.files_filtered += 1;
                continue;
            }

            let mode = dispatcher.select(&file.relative);
            if mode == TransferMode::Skip {
                self.stats.files_unmatched += 1;
                continue;
            }

            let content = tokio::fs::read(&file.path)
                .await
                .map_err(|source| SyncError::ReadSource {
                    path: file.path.clone(),
                    source,
                })?;
            let hash = Fingerprint::of(&content);
            self.stats.files_considered += 1;
            self.ledger.record_seen(&file.relative, hash.clone());

            if !self.ledger.has_changed(&file.relative, &hash) {
                tracing::trace!(path = %file.relative, "unchanged");
                self.stats.files_unchanged += 1;
                continue;
            }

            tracing::info!(path = %file.relative, ?mode, bytes = content.len(), "uploading");
            if let Err(err) = transfer(&mut self.cursor, mode, &file.relative, &content).await {
                // Not on the server: must not be persisted as uploaded.
                self.ledger.revert(&file.relative);
                return Err(err);
            }

            self.stats.files_transferred += 1;
            self.stats.bytes_transferred += content.len() as u64;
            match mode {
                TransferMode::Text => self.stats.text_files += 1,
                TransferMode::Binary => self.stats.binary_files += 1,
                TransferMode::Skip => {}
            }

            self.changed += 1;
            if self.changed % self.checkpoint_every == 0 {
                self.checkpoint()?;
            }
        }

        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        tracing::debug!(changed = self.changed, "checkpointing ledger");
        self.ledger.persist()?;
        self.stats.checkpoints += 1;
        Ok(())
    }

    /// Delete remote files uploaded by an earlier run that no upload of this
    /// session considered. Allowed once, after the last upload.
    ///
    /// A failed delete is logged and the file forgotten anyway; a file whose
    /// remote directory does not exist is simply forgotten.
    pub async fn delete_old_files(&mut self) -> Result<()> {
        if !matches!(self.state, EngineState::Idle | EngineState::Uploading) {
            return Err(self.invalid("delete_old_files"));
        }
        self.state = EngineState::Reconciling;

        for path in self.ledger.deletions() {
            let (dir, name) = split_file_path(&path);

            if self.cursor.ensure_dir(dir, false).await? {
                tracing::info!(path = %path, "deleting");
                match self.cursor.session_mut().delete(name).await {
                    Ok(()) => self.stats.files_deleted += 1,
                    Err(err) => {
                        tracing::warn!(path = %path, error = %err, "delete failed; forgetting file anyway");
                        self.stats.delete_failures += 1;
                    }
                }
            } else {
                tracing::debug!(path = %path, "remote directory gone; nothing to delete");
                self.stats.deletes_skipped += 1;
            }

            self.ledger.remove_from_next(&path);
        }

        Ok(())
    }

    /// Close the session and write the ledger.
    ///
    /// Safe after a failed upload: whatever the ledger holds is persisted. A
    /// session that cannot be closed cleanly is only logged.
    pub async fn finish(&mut self) -> Result<SyncStats> {
        if self.state == EngineState::Finished {
            return Err(self.invalid("finish"));
        }
        self.state = EngineState::Finished;

        if let Err(err) = self.cursor.quit().await {
            tracing::warn!(error = %err, "session did not close cleanly");
        }
        self.ledger.persist()?;

        self.stats.dirs_created = self.cursor.dirs_created();
        self.stats.duration = self.started.elapsed();
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Command, MemoryRemote};
    use std::fs;
    use tempfile::TempDir;

    fn spec(source: &std::path::Path) -> UploadSpec {
        UploadSpec {
            source: source.to_path_buf(),
            text: vec!["*.html".into()],
            binary: vec!["*.gif".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_state_machine() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        let mut engine = SyncEngine::new(remote.session(), FingerprintLedger::in_memory());
        assert_eq!(engine.state(), EngineState::Idle);

        engine.upload(&spec(temp.path())).await.unwrap();
        assert_eq!(engine.state(), EngineState::Uploading);

        engine.delete_old_files().await.unwrap();
        assert_eq!(engine.state(), EngineState::Reconciling);
        assert!(matches!(
            engine.upload(&spec(temp.path())).await,
            Err(SyncError::InvalidState { operation: "upload", .. })
        ));
        assert!(engine.delete_old_files().await.is_err());

        engine.finish().await.unwrap();
        assert_eq!(engine.state(), EngineState::Finished);
        assert!(engine.finish().await.is_err());
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn test_filters_and_unmatched() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.html"), "a").unwrap();
        fs::write(temp.path().join("draft.html"), "d").unwrap();
        fs::write(temp.path().join("notes.txt"), "n").unwrap();

        let remote = MemoryRemote::new();
        let mut engine = SyncEngine::new(remote.session(), FingerprintLedger::in_memory());
        let mut upload = spec(temp.path());
        upload.skip = Some("draft*".into());
        engine.upload(&upload).await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.files_filtered, 1);
        assert_eq!(stats.files_unmatched, 1);
        assert_eq!(stats.files_transferred, 1);
        assert_eq!(remote.files(), vec!["a.html"]);
        // Filtered and unmatched files are not tracked
        assert_eq!(engine.ledger().seen().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_store_is_not_recorded() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.html"), "a").unwrap();
        fs::write(temp.path().join("b.html"), "b").unwrap();

        let remote = MemoryRemote::new();
        remote.fail_store("b.html");
        let mut engine = SyncEngine::new(remote.session(), FingerprintLedger::in_memory());

        let err = engine.upload(&spec(temp.path())).await.unwrap_err();
        assert!(matches!(err, SyncError::Transfer { ref path, .. } if path == "b.html"));

        assert!(engine.ledger().next().contains_key("a.html"));
        assert!(!engine.ledger().next().contains_key("b.html"));
        assert!(engine.ledger().seen().contains_key("b.html"));

        engine.finish().await.unwrap();
        assert_eq!(remote.commands().last(), Some(&Command::Quit));
    }

    #[tokio::test]
    async fn test_host_dir_sets_root_once() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/a.html"), "a").unwrap();
        fs::write(temp.path().join("sub/b.html"), "b").unwrap();

        let remote = MemoryRemote::new();
        remote.add_dir("www");
        let mut engine = SyncEngine::new(remote.session(), FingerprintLedger::in_memory());
        let mut upload = spec(temp.path());
        upload.host_dir = Some("www".into());
        engine.upload(&upload).await.unwrap();

        assert_eq!(remote.files(), vec!["www/sub/a.html", "www/sub/b.html"]);
        assert_eq!(
            remote.commands(),
            vec![
                Command::Cwd("www".into()),
                Command::Cwd("sub".into()),
                Command::Mkd("sub".into()),
                Command::Cwd("sub".into()),
                Command::StoreText("a.html".into()),
                Command::StoreText("b.html".into()),
            ]
        );
    }
}
