//! Source tree enumeration.

use crate::error::{Result, SyncError};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path below the source root, `/`-separated. Also the ledger key and the
    /// remote path below the session root.
    pub relative: String,
}

/// Every regular file below `root`, sorted by relative path.
///
/// Nothing is filtered: hidden files are included and ignore files are not
/// consulted, since pattern selection happens later.
pub fn source_files(root: &Path) -> Result<Vec<SourceFile>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| SyncError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative_string(rel);
        if relative.is_empty() {
            continue;
        }
        // Neither the ledger lines nor an FTP command can carry a line break.
        if relative.contains(['\r', '\n']) {
            tracing::warn!(path = ?relative, "skipping file with a line break in its name");
            continue;
        }
        files.push(SourceFile {
            path: entry.into_path(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn relative_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sorted_recursive_listing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("b/sub")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("z.html"), "z").unwrap();
        fs::write(root.join("b/sub/deep.gif"), "d").unwrap();
        fs::write(root.join("a/one.css"), "1").unwrap();
        fs::write(root.join(".hidden"), "h").unwrap();
        fs::write(root.join(".gitignore"), "z.html\n").unwrap();

        let names: Vec<String> = source_files(root)
            .unwrap()
            .into_iter()
            .map(|f| f.relative)
            .collect();
        assert_eq!(
            names,
            vec![".gitignore", ".hidden", "a/one.css", "b/sub/deep.gif", "z.html"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_line_breaks_in_names_are_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("bad\rdir")).unwrap();
        fs::write(root.join("ok.html"), "o").unwrap();
        fs::write(root.join("evil\nname.html"), "e").unwrap();
        fs::write(root.join("bad\rdir/inner.html"), "i").unwrap();

        let names: Vec<String> = source_files(root)
            .unwrap()
            .into_iter()
            .map(|f| f.relative)
            .collect();
        assert_eq!(names, vec!["ok.html"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = source_files(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, SyncError::Walk { .. }));
    }
}
