//! Dry-run session: logs what would be sent and pretends it worked.

use crate::remote::{RemoteSession, SessionResult};
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct TraceSession {
    commands: usize,
}

impl TraceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands that would have been sent.
    pub fn commands(&self) -> usize {
        self.commands
    }
}

#[async_trait]
impl RemoteSession for TraceSession {
    async fn change_dir(&mut self, name: &str) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", "CWD {}", name);
        Ok(())
    }

    async fn change_dir_up(&mut self) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", "CDUP");
        Ok(())
    }

    async fn make_dir(&mut self, name: &str) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", "MKD {}", name);
        Ok(())
    }

    async fn store_text(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", bytes = content.len(), "STOR (ascii) {}", name);
        Ok(())
    }

    async fn store_binary(&mut self, name: &str, content: &[u8]) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", bytes = content.len(), "STOR (binary) {}", name);
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", "DELE {}", name);
        Ok(())
    }

    async fn quit(&mut self) -> SessionResult<()> {
        self.commands += 1;
        tracing::info!(target: "upsync::dry_run", "QUIT");
        Ok(())
    }
}
