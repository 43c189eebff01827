//! In-memory remote filesystem.
//!
//! Behaves like a small FTP server: a tree of directories and files, a working
//! directory per connection, and 550 replies for anything missing. Every command
//! is recorded so callers can assert on the exact traffic a sync produced.

use crate::remote::{RemoteSession, SessionError, SessionResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A command as it reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Cwd(String),
    Cdup,
    Mkd(String),
    StoreText(String),
    StoreBinary(String),
    Dele(String),
    Quit,
}

#[derive(Default)]
struct RemoteState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    cwd: Vec<String>,
    commands: Vec<Command>,
    refuse_mkdir: BTreeSet<String>,
    fail_store: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
    closed: bool,
}

impl RemoteState {
    fn join(&self, name: &str) -> String {
        let mut parts = self.cwd.clone();
        parts.push(name.to_string());
        parts.join("/")
    }

    fn dir_exists(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn check_open(&self) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Protocol("session already closed".into()));
        }
        Ok(())
    }
}

fn not_found(what: &str) -> SessionError {
    SessionError::Rejected {
        code: 550,
        message: format!("{}: No such file or directory", what),
    }
}

/// Handle to the shared remote tree. Clone freely; all clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session on this remote, positioned at its root.
    pub fn session(&self) -> MemorySession {
        let mut state = self.lock();
        state.cwd.clear();
        state.closed = false;
        MemorySession {
            state: Arc::clone(&self.state),
        }
    }

    /// Create `path` and all of its ancestors.
    pub fn add_dir(&self, path: &str) {
        let mut state = self.lock();
        let mut current = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push(segment);
            state.dirs.insert(current.join("/"));
        }
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        if let Some(idx) = path.rfind('/') {
            self.add_dir(&path[..idx]);
        }
        self.lock().files.insert(path.to_string(), content.to_vec());
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dir_exists(path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// All stored file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Number of store commands (text or binary) received.
    pub fn store_count(&self) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| matches!(c, Command::StoreText(_) | Command::StoreBinary(_)))
            .count()
    }

    pub fn cwd(&self) -> String {
        self.lock().cwd.join("/")
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse `MKD` for the directory at `path` (permission denied).
    pub fn refuse_mkdir(&self, path: &str) {
        self.lock().refuse_mkdir.insert(path.to_string());
    }

    /// Fail `STOR` for the file at `path`.
    pub fn fail_store(&self, path: &str) {
        self.lock().fail_store.insert(path.to_string());
    }

    /// Fail `DELE` for the file at `path`.
    pub fn fail_delete(&self, path: &str) {
        self.lock().fail_delete.insert(path.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MemorySession {
    state: Arc<Mutex<RemoteState>>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&mut self, name: &str, content: &[u8], command: Command) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(command);
        let full = state.join(name);
        if state.fail_store.contains(&full) {
            return Err(SessionError::Rejected {
                code: 451,
                message: format!("{}: Local error in processing", full),
            });
        }
        state.files.insert(full, content.to_vec());
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn change_dir(&mut self, name: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(Command::Cwd(name.to_string()));

        let mut target = if name.starts_with('/') {
            Vec::new()
        } else {
            state.cwd.clone()
        };
        for segment in name.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    target.pop();
                }
                s => target.push(s.to_string()),
            }
        }

        if !state.dir_exists(&target.join("/")) {
            return Err(not_found(name));
        }
        state.cwd = target;
        Ok(())
    }

    async fn change_dir_up(&mut self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(Command::Cdup);
        state.cwd.pop();
        Ok(())
    }

    async fn make_dir(&mut self, name: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(Command::Mkd(name.to_string()));
        let full = state.join(name);
        if state.refuse_mkdir.contains(&full) {
            return Err(SessionError::Rejected {
                code: 550,
                message: format!("{}: Permission denied", full),
            });
        }
        if state.dirs.contains(&full) {
            return Err(SessionError::Rejected {
                code: 550,
                message: format!("{}: File exists", full),
            });
        }
        state.dirs.insert(full);
        Ok(())
    }

    async fn store_text(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        self.store(name, content, Command::StoreText(name.to_string()))
    }

    async fn store_binary(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        self.store(name, content, Command::StoreBinary(name.to_string()))
    }

    async fn delete(&mut self, name: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(Command::Dele(name.to_string()));
        let full = state.join(name);
        if state.fail_delete.contains(&full) {
            return Err(SessionError::Rejected {
                code: 550,
                message: format!("{}: Permission denied", full),
            });
        }
        if state.files.remove(&full).is_none() {
            return Err(not_found(&full));
        }
        Ok(())
    }

    async fn quit(&mut self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.commands.push(Command::Quit);
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_lands_in_working_directory() {
        let remote = MemoryRemote::new();
        remote.add_dir("www/img");
        let mut session = remote.session();

        session.change_dir("www/img").await.unwrap();
        session.store_binary("logo.gif", b"GIF89a").await.unwrap();

        assert_eq!(remote.file("www/img/logo.gif").unwrap(), b"GIF89a");
        assert_eq!(remote.cwd(), "www/img");
    }

    #[tokio::test]
    async fn test_missing_directory_is_rejected() {
        let remote = MemoryRemote::new();
        let mut session = remote.session();

        let err = session.change_dir("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected { code: 550, .. }));
        assert_eq!(remote.cwd(), "");
    }

    #[tokio::test]
    async fn test_commands_after_quit_fail() {
        let remote = MemoryRemote::new();
        let mut session = remote.session();

        session.quit().await.unwrap();
        assert!(remote.is_closed());
        assert!(session.change_dir_up().await.is_err());
    }
}
