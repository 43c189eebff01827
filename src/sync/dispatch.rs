//! Pattern → transfer mode selection.

use crate::error::{Result, SyncError};
use crate::remote::{split_file_path, RemoteCursor, RemoteSession};
use glob::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Line-oriented store; the server may translate line endings.
    Text,
    /// Byte-exact store.
    Binary,
    /// No pattern matched: not ours to upload.
    Skip,
}

pub fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|source| SyncError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Final segment of a `/`-separated path.
pub fn file_name(path: &str) -> &str {
    split_file_path(path).1
}

/// Ordered pattern table. Text patterns come first, then binary ones, and the
/// first match wins. A pattern listed under both modes is binary.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    rules: Vec<(Pattern, TransferMode)>,
}

impl Dispatcher {
    pub fn new<T, B>(text: &[T], binary: &[B]) -> Result<Self>
    where
        T: AsRef<str>,
        B: AsRef<str>,
    {
        let mut rules: Vec<(Pattern, TransferMode)> = Vec::new();
        for pat in text {
            rules.push((compile(pat.as_ref())?, TransferMode::Text));
        }
        for pat in binary {
            let pattern = compile(pat.as_ref())?;
            match rules.iter_mut().find(|(p, _)| p.as_str() == pattern.as_str()) {
                Some(rule) => rule.1 = TransferMode::Binary,
                None => rules.push((pattern, TransferMode::Binary)),
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn select(&self, relative_path: &str) -> TransferMode {
        let name = file_name(relative_path);
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(name))
            .map(|(_, mode)| *mode)
            .unwrap_or(TransferMode::Skip)
    }
}

/// Upload `content` to `remote_path` (relative to the session root), creating
/// directories on the way.
pub async fn transfer<S: RemoteSession>(
    cursor: &mut RemoteCursor<S>,
    mode: TransferMode,
    remote_path: &str,
    content: &[u8],
) -> Result<()> {
    let (dir, name) = split_file_path(remote_path);
    cursor.ensure_dir(dir, true).await?;

    let stored = match mode {
        TransferMode::Text => cursor.session_mut().store_text(name, content).await,
        TransferMode::Binary => cursor.session_mut().store_binary(name, content).await,
        TransferMode::Skip => return Ok(()),
    };
    stored.map_err(|source| SyncError::Transfer {
        path: remote_path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Command, MemoryRemote};

    #[test]
    fn test_select_by_final_segment() {
        let d = Dispatcher::new(&["*.html", "*.css"], &["*.gif", "*.jp?g"]).unwrap();
        assert_eq!(d.select("index.html"), TransferMode::Text);
        assert_eq!(d.select("css/site.css"), TransferMode::Text);
        assert_eq!(d.select("img/logo.gif"), TransferMode::Binary);
        assert_eq!(d.select("img/photo.jpeg"), TransferMode::Binary);
        assert_eq!(d.select("notes.txt"), TransferMode::Skip);
        // Directory names never match
        assert_eq!(d.select("x.html/readme"), TransferMode::Skip);
    }

    #[test]
    fn test_first_match_wins() {
        let d = Dispatcher::new(&["*.*"], &["*.gif"]).unwrap();
        assert_eq!(d.select("a.gif"), TransferMode::Text);

        let both = Dispatcher::new(&["*.svg"], &["*.svg"]).unwrap();
        assert_eq!(both.select("a.svg"), TransferMode::Binary);
    }

    #[test]
    fn test_bracket_classes_and_case() {
        let d = Dispatcher::new(&["[a-c]*.html"], &["[!a-c]*.html"]).unwrap();
        assert_eq!(d.select("b.html"), TransferMode::Text);
        assert_eq!(d.select("z.html"), TransferMode::Binary);
        assert_eq!(d.select("B.HTML"), TransferMode::Skip);
    }

    #[test]
    fn test_empty_tables_skip_everything() {
        let d = Dispatcher::new::<&str, &str>(&[], &[]).unwrap();
        assert!(d.is_empty());
        assert_eq!(d.select("a.html"), TransferMode::Skip);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Dispatcher::new(&["[unclosed"], &[] as &[&str]).unwrap_err();
        assert!(matches!(err, SyncError::Pattern { ref pattern, .. } if pattern == "[unclosed"));
    }

    #[tokio::test]
    async fn test_transfer_creates_directory_then_stores() {
        let remote = MemoryRemote::new();
        let mut cursor = RemoteCursor::new(remote.session());

        transfer(&mut cursor, TransferMode::Binary, "img/a.gif", b"GIF")
            .await
            .unwrap();
        transfer(&mut cursor, TransferMode::Text, "img/b.html", b"<p>")
            .await
            .unwrap();

        assert_eq!(remote.file("img/a.gif").unwrap(), b"GIF");
        assert_eq!(
            remote.commands(),
            vec![
                Command::Cwd("img".into()),
                Command::Mkd("img".into()),
                Command::Cwd("img".into()),
                Command::StoreBinary("a.gif".into()),
                Command::StoreText("b.html".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_store_failure_names_the_path() {
        let remote = MemoryRemote::new();
        remote.fail_store("a.html");
        let mut cursor = RemoteCursor::new(remote.session());

        let err = transfer(&mut cursor, TransferMode::Text, "a.html", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transfer { ref path, .. } if path == "a.html"));
    }
}
