// Fingerprint ledger
//
// Remembers the content hash of every file uploaded by previous runs so that a
// run only transfers what changed. Three generations are kept:
//
//   previous - loaded at session start, what we believe the server holds
//   seen     - every file considered during this run
//   next     - previous, overwritten by seen, minus deletions; what gets written
//
// On disk: one `<hash> <path>` line per file, sorted by path. Writes go through a
// temp file and a rename, so a crash never leaves a truncated ledger behind.

pub mod legacy;

use crate::error::{Result, SyncError};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hex-encoded content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// BLAKE3 digest of `content`.
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(blake3::hash(content).as_bytes()))
    }

    /// Accept a stored digest. Digests written by other algorithms are kept
    /// as-is; they just never compare equal to a fresh one.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exclusive advisory lock held for the lifetime of a session.
///
/// Lives in a `<ledger>.lock` sidecar because the ledger itself is replaced by
/// rename on every persist.
#[derive(Debug)]
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    fn acquire(ledger: &Path) -> Result<Self> {
        let path = sidecar(ledger, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SyncError::LedgerRead {
                path: path.clone(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(SyncError::LedgerLocked(ledger.to_path_buf()))
            }
            Err(source) => Err(SyncError::LedgerRead { path, source }),
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Default)]
pub struct FingerprintLedger {
    file: Option<PathBuf>,
    previous: BTreeMap<String, Fingerprint>,
    seen: BTreeMap<String, Fingerprint>,
    next: BTreeMap<String, Fingerprint>,
    lock: Option<LedgerLock>,
    persists: u64,
}

impl FingerprintLedger {
    /// A ledger with no backing file. Persisting it does nothing.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`. A missing file is a first run and yields an
    /// empty ledger; a file that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let previous = read_entries(path)?;
        tracing::debug!(path = %path.display(), entries = previous.len(), "loaded ledger");
        Ok(Self {
            file: Some(path.to_path_buf()),
            next: previous.clone(),
            previous,
            ..Self::default()
        })
    }

    /// Lock the ledger for this session, then load it.
    pub fn open(path: &Path) -> Result<Self> {
        let lock = LedgerLock::acquire(path)?;
        let mut ledger = Self::load(path)?;
        ledger.lock = Some(lock);
        Ok(ledger)
    }

    /// Stop writing to the backing file (dry runs).
    pub fn detach(&mut self) {
        self.file = None;
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn previous(&self) -> &BTreeMap<String, Fingerprint> {
        &self.previous
    }

    pub fn seen(&self) -> &BTreeMap<String, Fingerprint> {
        &self.seen
    }

    pub fn next(&self) -> &BTreeMap<String, Fingerprint> {
        &self.next
    }

    /// How many times the ledger was written to disk.
    pub fn persist_count(&self) -> u64 {
        self.persists
    }

    pub fn record_seen(&mut self, path: &str, hash: Fingerprint) {
        self.next.insert(path.to_string(), hash.clone());
        self.seen.insert(path.to_string(), hash);
    }

    pub fn has_changed(&self, path: &str, hash: &Fingerprint) -> bool {
        self.previous.get(path) != Some(hash)
    }

    /// Paths uploaded by an earlier run that this run never considered, sorted.
    pub fn deletions(&self) -> Vec<String> {
        self.previous
            .keys()
            .filter(|path| !self.seen.contains_key(*path))
            .cloned()
            .collect()
    }

    pub fn remove_from_next(&mut self, path: &str) {
        self.next.remove(path);
    }

    /// Restore the previous entry of a file whose upload failed, so the ledger
    /// never claims it reached the server. It stays in `seen`: the file still
    /// exists locally and must not be scheduled for deletion.
    pub fn revert(&mut self, path: &str) {
        match self.previous.get(path) {
            Some(hash) => {
                self.next.insert(path.to_string(), hash.clone());
            }
            None => {
                self.next.remove(path);
            }
        }
    }

    /// Write the next generation to the backing file, if there is one.
    pub fn persist(&mut self) -> Result<()> {
        let Some(path) = self.file.clone() else {
            return Ok(());
        };
        self.persist_to(&path)?;
        self.persists += 1;
        Ok(())
    }

    /// Write the next generation to `path` (atomic replace).
    pub fn persist_to(&self, path: &Path) -> Result<()> {
        let temp_file = sidecar(path, ".tmp");
        let wrap = |source: io::Error| SyncError::LedgerWrite {
            path: path.to_path_buf(),
            source,
        };

        {
            let file = File::create(&temp_file).map_err(wrap)?;
            let mut out = BufWriter::new(file);
            // BTreeMap iteration is already sorted by path
            for (name, hash) in &self.next {
                writeln!(out, "{} {}", hash, name).map_err(wrap)?;
            }
            let file = out.into_inner().map_err(|e| wrap(e.into_error()))?;
            file.sync_all().map_err(wrap)?;
        }

        fs::rename(&temp_file, path).map_err(wrap)?;
        tracing::debug!(path = %path.display(), entries = self.next.len(), "persisted ledger");
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, Fingerprint>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(SyncError::LedgerRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let format_error = |line: usize, reason: String| SyncError::LedgerFormat {
        path: path.to_path_buf(),
        line,
        reason,
    };

    if data.first() == Some(&legacy::MARKER) {
        tracing::info!(path = %path.display(), "reading legacy ledger; it will be rewritten in line format");
        let raw = legacy::parse(&data).map_err(|e| format_error(e.line, e.reason))?;
        return raw
            .into_iter()
            .map(|(name, hash)| match Fingerprint::parse(&hash) {
                Some(hash) => Ok((name, hash)),
                None => Err(format_error(0, format!("bad digest for {}: {:?}", name, hash))),
            })
            .collect();
    }

    let text = String::from_utf8(data).map_err(|_| format_error(0, "not valid UTF-8".into()))?;
    parse_lines(&text).map_err(|(line, reason)| format_error(line, reason))
}

/// Parse `<hash> <path>` lines. Blank lines are ignored; the path is everything
/// after the first space, so it may itself contain spaces.
pub fn parse_lines(
    text: &str,
) -> std::result::Result<BTreeMap<String, Fingerprint>, (usize, String)> {
    let mut entries = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some((hash, name)) = line.split_once(' ') else {
            return Err((idx + 1, format!("expected '<hash> <path>', got {:?}", line)));
        };
        let Some(hash) = Fingerprint::parse(hash) else {
            return Err((idx + 1, format!("bad digest {:?}", hash)));
        };
        if name.is_empty() {
            return Err((idx + 1, "empty path".into()));
        }
        entries.insert(name.to_string(), hash);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(s.as_bytes())
    }

    #[test]
    fn test_missing_file_is_first_run() {
        let temp = TempDir::new().unwrap();
        let ledger = FingerprintLedger::load(&temp.path().join("none.ledger")).unwrap();
        assert!(ledger.previous().is_empty());
        assert!(ledger.next().is_empty());
    }

    #[test]
    fn test_load_line_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site.ledger");
        fs::write(
            &path,
            "0cc175b9c0f1b6a831c399e269772661 a.html\n\n92eb5ffee6ae2fec3ad71c777531578f dir/with space.gif\r\n",
        )
        .unwrap();

        let ledger = FingerprintLedger::load(&path).unwrap();
        assert_eq!(ledger.previous().len(), 2);
        assert_eq!(
            ledger.previous()["dir/with space.gif"].as_str(),
            "92eb5ffee6ae2fec3ad71c777531578f"
        );
        assert_eq!(ledger.previous(), ledger.next());
        assert!(ledger.seen().is_empty());
    }

    #[test]
    fn test_load_legacy_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("old.md5");
        fs::write(
            &path,
            "(dp0\nS'a.html'\np1\nS'0cc175b9c0f1b6a831c399e269772661'\np2\ns.",
        )
        .unwrap();

        let mut ledger = FingerprintLedger::load(&path).unwrap();
        assert_eq!(
            ledger.previous()["a.html"].as_str(),
            "0cc175b9c0f1b6a831c399e269772661"
        );

        // Written back in the line format
        ledger.persist().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "0cc175b9c0f1b6a831c399e269772661 a.html\n"
        );
    }

    #[test]
    fn test_unparseable_ledger_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.ledger");
        fs::write(&path, "abc a.html\nnospacehere\n").unwrap();

        let err = FingerprintLedger::load(&path).unwrap_err();
        assert!(matches!(err, SyncError::LedgerFormat { line: 2, .. }));

        fs::write(&path, "(dp0\nS'a.html'\n").unwrap();
        assert!(matches!(
            FingerprintLedger::load(&path),
            Err(SyncError::LedgerFormat { .. })
        ));
    }

    #[test]
    fn test_generations() {
        let mut ledger = FingerprintLedger::in_memory();
        ledger.previous.insert("keep.html".into(), fp("keep"));
        ledger.previous.insert("gone.gif".into(), fp("gone"));
        ledger.previous.insert("edit.css".into(), fp("old"));
        ledger.next = ledger.previous.clone();

        assert!(!ledger.has_changed("keep.html", &fp("keep")));
        assert!(ledger.has_changed("edit.css", &fp("new")));
        assert!(ledger.has_changed("brand-new.js", &fp("x")));

        ledger.record_seen("keep.html", fp("keep"));
        ledger.record_seen("edit.css", fp("new"));
        ledger.record_seen("brand-new.js", fp("x"));

        // previous is never touched during a session
        assert_eq!(ledger.previous()["edit.css"], fp("old"));
        assert_eq!(ledger.next()["edit.css"], fp("new"));
        assert_eq!(ledger.deletions(), vec!["gone.gif".to_string()]);

        ledger.remove_from_next("gone.gif");
        assert!(!ledger.next().contains_key("gone.gif"));
        assert_eq!(ledger.next().len(), 3);
    }

    #[test]
    fn test_deletions_sorted() {
        let mut ledger = FingerprintLedger::in_memory();
        for name in ["z.html", "a.html", "m/b.html"] {
            ledger.previous.insert(name.into(), fp(name));
        }
        assert_eq!(ledger.deletions(), vec!["a.html", "m/b.html", "z.html"]);
    }

    #[test]
    fn test_persist_sorted_and_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site.ledger");
        let mut ledger = FingerprintLedger::load(&path).unwrap();

        ledger.record_seen("b.gif", fp("b"));
        ledger.record_seen("a.html", fp("a"));
        ledger.persist().unwrap();
        let first = fs::read_to_string(&path).unwrap();
        ledger.persist().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
        assert_eq!(ledger.persist_count(), 2);

        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines[0], format!("{} a.html", fp("a")));
        assert_eq!(lines[1], format!("{} b.gif", fp("b")));
        assert!(!sidecar(&path, ".tmp").exists());
    }

    #[test]
    fn test_persist_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing-dir").join("site.ledger");
        let mut ledger = FingerprintLedger::load(&path).unwrap();
        ledger.record_seen("a.html", fp("a"));
        assert!(matches!(
            ledger.persist(),
            Err(SyncError::LedgerWrite { .. })
        ));
    }

    #[test]
    fn test_in_memory_persist_is_noop() {
        let mut ledger = FingerprintLedger::in_memory();
        ledger.record_seen("a.html", fp("a"));
        ledger.persist().unwrap();
        assert_eq!(ledger.persist_count(), 0);
    }

    #[test]
    fn test_second_session_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site.ledger");

        let first = FingerprintLedger::open(&path).unwrap();
        assert!(matches!(
            FingerprintLedger::open(&path),
            Err(SyncError::LedgerLocked(_))
        ));

        drop(first);
        assert!(FingerprintLedger::open(&path).is_ok());
    }

    #[test]
    fn test_fingerprint_is_fixed_width_hex() {
        let hash = Fingerprint::of(b"hello");
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(Fingerprint::parse(hash.as_str()), Some(hash));
        assert_eq!(Fingerprint::parse("ABCDEF").unwrap().as_str(), "abcdef");
        assert!(Fingerprint::parse("xyz").is_none());
        assert!(Fingerprint::parse("").is_none());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}(/[a-z .]{1,8}){0,2}", "[a-z0-9]{1,16}", 0..20)
        ) {
            let temp = TempDir::new().unwrap();
            let forward_path = temp.path().join("forward.ledger");
            let reverse_path = temp.path().join("reverse.ledger");

            let mut forward = FingerprintLedger::load(&forward_path).unwrap();
            for (name, content) in &entries {
                forward.record_seen(name, fp(content));
            }
            let mut reverse = FingerprintLedger::load(&reverse_path).unwrap();
            for (name, content) in entries.iter().rev() {
                reverse.record_seen(name, fp(content));
            }
            forward.persist().unwrap();
            reverse.persist().unwrap();

            prop_assert_eq!(
                fs::read(&forward_path).unwrap(),
                fs::read(&reverse_path).unwrap()
            );
            let reloaded = FingerprintLedger::load(&forward_path).unwrap();
            prop_assert_eq!(reloaded.previous(), forward.next());
        }
    }
}
