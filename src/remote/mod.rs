//! Remote session abstraction.
//!
//! A session is a single stateful connection positioned in one remote working
//! directory at a time. Every command is relative to that directory, so callers
//! go through [`RemoteCursor`] instead of issuing navigation themselves.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub mod cursor;
pub mod ftp;
pub mod memory;
pub mod trace;

pub use cursor::RemoteCursor;
pub use ftp::{FtpConfig, FtpSession};
pub use memory::{Command, MemoryRemote, MemorySession};
pub use trace::TraceSession;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The server answered with a transient (4xx) or permanent (5xx) negative reply.
    #[error("server replied {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// True when the server understood the command and refused it.
    ///
    /// Refusals leave the connection usable; every other variant means the
    /// session itself is broken.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SessionError::Rejected { .. })
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Minimal command set the sync engine needs from a transport.
#[async_trait]
pub trait RemoteSession: Send {
    /// Enter `name`, a directory relative to the current one (may contain `/`).
    async fn change_dir(&mut self, name: &str) -> SessionResult<()>;

    async fn change_dir_up(&mut self) -> SessionResult<()>;

    async fn make_dir(&mut self, name: &str) -> SessionResult<()>;

    /// Store `content` line by line, letting the server translate line endings.
    async fn store_text(&mut self, name: &str, content: &[u8]) -> SessionResult<()>;

    /// Store `content` byte for byte.
    async fn store_binary(&mut self, name: &str, content: &[u8]) -> SessionResult<()>;

    async fn delete(&mut self, name: &str) -> SessionResult<()>;

    /// Terminate the session. No command may follow.
    async fn quit(&mut self) -> SessionResult<()>;
}

#[async_trait]
impl<S: RemoteSession + ?Sized> RemoteSession for Box<S> {
    async fn change_dir(&mut self, name: &str) -> SessionResult<()> {
        (**self).change_dir(name).await
    }

    async fn change_dir_up(&mut self) -> SessionResult<()> {
        (**self).change_dir_up().await
    }

    async fn make_dir(&mut self, name: &str) -> SessionResult<()> {
        (**self).make_dir(name).await
    }

    async fn store_text(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        (**self).store_text(name, content).await
    }

    async fn store_binary(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        (**self).store_binary(name, content).await
    }

    async fn delete(&mut self, name: &str) -> SessionResult<()> {
        (**self).delete(name).await
    }

    async fn quit(&mut self) -> SessionResult<()> {
        (**self).quit().await
    }
}

/// Split a `/`-separated relative path into its non-empty segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Split a relative file path into (directory, file name).
///
/// `"a/b/c.html"` → `("a/b", "c.html")`, `"c.html"` → `("", "c.html")`.
pub fn split_file_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments(""), Vec::<&str>::new());
        assert_eq!(path_segments("a/b"), vec!["a", "b"]);
        assert_eq!(path_segments("/a//b/"), vec!["a", "b"]);
        assert_eq!(path_segments("./a"), vec!["a"]);
    }

    #[test]
    fn test_split_file_path() {
        assert_eq!(split_file_path("a/b/c.html"), ("a/b", "c.html"));
        assert_eq!(split_file_path("c.html"), ("", "c.html"));
    }

    #[test]
    fn test_rejection_classification() {
        let rejected = SessionError::Rejected {
            code: 550,
            message: "No such directory".into(),
        };
        assert!(rejected.is_rejection());
        assert!(!SessionError::Timeout(Duration::from_secs(1)).is_rejection());
        assert!(!SessionError::Protocol("garbled".into()).is_rejection());
    }
}
