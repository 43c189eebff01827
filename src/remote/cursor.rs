//! Remote working-directory tracking.
//!
//! The cursor remembers where the session is positioned (relative to the root set
//! with [`RemoteCursor::set_root`]) and moves it with as few round trips as it can:
//! climb to the longest common prefix of the current and target directories, then
//! descend. Files walked in sorted order mostly share a directory, so most moves
//! issue no command at all.

use crate::error::{Result, SyncError};
use crate::remote::{path_segments, RemoteSession, SessionResult};

pub struct RemoteCursor<S> {
    session: S,
    /// Segments below the conceptual root. Only ever advanced after the
    /// corresponding command succeeded.
    segments: Vec<String>,
    dirs_created: u64,
}

impl<S: RemoteSession> RemoteCursor<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            segments: Vec::new(),
            dirs_created: 0,
        }
    }

    /// Directory the session is known to be in, relative to the root.
    pub fn current_dir(&self) -> String {
        self.segments.join("/")
    }

    pub fn dirs_created(&self) -> u64 {
        self.dirs_created
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Make `dir` the conceptual root for every later path.
    ///
    /// `dir` is resolved from the current root, so the cursor climbs back to it
    /// first when it is below it.
    pub async fn set_root(&mut self, dir: &str) -> Result<()> {
        self.climb_to(0).await?;
        tracing::debug!(dir, "cd (root)");
        self.session.change_dir(dir).await?;
        Ok(())
    }

    /// Position the session in `target`.
    ///
    /// Returns `Ok(false)` when a directory on the way does not exist and
    /// `create` is false; the cursor then stays at the deepest directory it
    /// actually reached. With `create`, missing directories are made, and a
    /// failure to make one is an error.
    pub async fn ensure_dir(&mut self, target: &str, create: bool) -> Result<bool> {
        let wanted = path_segments(target);

        let common = self
            .segments
            .iter()
            .zip(&wanted)
            .take_while(|(have, want)| have.as_str() == **want)
            .count();

        self.climb_to(common).await?;

        for segment in &wanted[common..] {
            tracing::debug!(dir = segment, "cd");
            match self.session.change_dir(segment).await {
                Ok(()) => {}
                // A broken connection is not "directory missing".
                Err(err) if !err.is_rejection() => return Err(err.into()),
                Err(_) if create => {
                    let full = self.child_path(segment);
                    tracing::debug!(dir = %full, "mkdir");
                    self.session
                        .make_dir(segment)
                        .await
                        .map_err(|source| SyncError::CreateDir {
                            dir: full.clone(),
                            source,
                        })?;
                    self.dirs_created += 1;
                    self.session
                        .change_dir(segment)
                        .await
                        .map_err(|source| SyncError::CreateDir { dir: full, source })?;
                }
                Err(err) => {
                    tracing::debug!(dir = %self.child_path(segment), error = %err, "remote directory absent");
                    return Ok(false);
                }
            }
            self.segments.push((*segment).to_string());
        }

        Ok(true)
    }

    pub async fn quit(&mut self) -> SessionResult<()> {
        tracing::debug!("quit");
        self.session.quit().await
    }

    async fn climb_to(&mut self, depth: usize) -> SessionResult<()> {
        while self.segments.len() > depth {
            tracing::debug!("cd ..");
            self.session.change_dir_up().await?;
            self.segments.pop();
        }
        Ok(())
    }

    fn child_path(&self, segment: &str) -> String {
        if self.segments.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.current_dir(), segment)
        }
    }
}
