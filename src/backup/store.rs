//! On-disk backup store for one source tree.
//!
//! Layout under the configured backup directory:
//!
//! ```text
//! <backup_dir>/<uuid-v5 of the canonical source root>/
//!     tree.json                          which tree these backups belong to
//!     manifest.jsonl                     one BackupRecord per line, append-only
//!     snapshots/<rel path>.<seq>.bak     captured bytes
//! ```

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RepairError, RepairResult};
use crate::workspace::{write_atomic, SourceTree};

/// Namespace UUID for deriving per-tree backup directory names.
const TEXMEND_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x7a, 0x52, 0x0e, 0x94, 0x4b, 0x8d, 0x9a, 0x61, 0x2d, 0xc4, 0x5e, 0x07, 0xb3, 0x19,
]);

const MANIFEST_FILE: &str = "manifest.jsonl";
const TREE_FILE: &str = "tree.json";
const SNAPSHOT_DIR: &str = "snapshots";

/// Compute a UUID v5 from a source root path for stable directory naming.
/// Same path always produces the same UUID.
pub fn compute_path_uuid(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    Uuid::new_v5(&TEXMEND_NAMESPACE, normalized.as_bytes()).to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    /// Content captured before a mutation.
    Snapshot,
    /// Content written back by a restore.
    Restore,
}

/// Immutable record of a file's bytes at one point in time.
///
/// The bytes themselves live in the snapshot file; use
/// [`BackupStore::content`] to load them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub path: String,
    pub seq: u64,
    pub sha256: String,
    pub size: u64,
    pub captured_at: DateTime<Utc>,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
}

#[derive(Debug, Default)]
struct ManifestState {
    next_seq: u64,
    records: Vec<BackupRecord>,
}

/// Snapshot/restore primitive shared by every tool that mutates a tree.
///
/// Calls for the same path are serialized; the sequence number is global to
/// the tree and strictly increasing, also across re-opens of the same store.
#[derive(Debug)]
pub struct BackupStore {
    tree: SourceTree,
    dir: PathBuf,
    state: Mutex<ManifestState>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackupStore {
    /// Open (or create) the backup directory for `tree` under `backup_root`.
    ///
    /// The backup root must not be inside the source tree: backups are never
    /// read back as document source.
    pub fn open(tree: &SourceTree, backup_root: &Path) -> RepairResult<Self> {
        fs::create_dir_all(backup_root).map_err(|e| RepairError::backup(backup_root, e))?;
        let backup_root = backup_root
            .canonicalize()
            .map_err(|e| RepairError::backup(backup_root, e))?;
        if backup_root.starts_with(tree.root()) {
            return Err(RepairError::InvalidArgument(format!(
                "backup directory {} is inside the source tree {}",
                backup_root.display(),
                tree.root().display()
            )));
        }

        let dir = backup_root.join(compute_path_uuid(tree.root()));
        let snapshots = dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&snapshots).map_err(|e| RepairError::backup(&snapshots, e))?;

        let tree_file = dir.join(TREE_FILE);
        if !tree_file.exists() {
            let info = serde_json::json!({
                "root": tree.root().to_string_lossy(),
                "createdAt": Utc::now(),
            });
            let bytes = serde_json::to_vec_pretty(&info)
                .map_err(|e| RepairError::backup(&tree_file, io::Error::new(io::ErrorKind::Other, e)))?;
            write_atomic(&tree_file, &bytes).map_err(|e| RepairError::backup(&tree_file, e))?;
        }

        let records = Self::load_manifest(&dir.join(MANIFEST_FILE))?;
        let next_seq = records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;
        debug!(
            "Opened backup store {} ({} records)",
            dir.display(),
            records.len()
        );

        Ok(Self {
            tree: tree.clone(),
            dir,
            state: Mutex::new(ManifestState { next_seq, records }),
            path_locks: Mutex::new(HashMap::new()),
        })
    }

    fn load_manifest(path: &Path) -> RepairResult<Vec<BackupRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|e| RepairError::backup(path, e))?;
        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BackupRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Ignoring malformed manifest line {} in {}: {}",
                    idx + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    /// Directory holding this tree's backups.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_lock(&self, rel: &str) -> Arc<Mutex<()>> {
        lock(&self.path_locks)
            .entry(rel.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn snapshot_path(&self, rel: &str, seq: u64) -> PathBuf {
        self.dir
            .join(SNAPSHOT_DIR)
            .join(format!("{}.{:06}.bak", rel, seq))
    }

    /// Capture the current on-disk bytes of `rel`.
    ///
    /// A snapshot whose content equals the latest record for the same path
    /// returns that record instead of appending a duplicate. A source file
    /// that cannot be read is an `Io` failure; only writes into the store
    /// itself fail with `Backup`.
    pub fn snapshot(&self, rel: &str) -> RepairResult<BackupRecord> {
        let rel = SourceTree::normalize(rel)?;
        let path_lock = self.path_lock(&rel);
        let _guard = lock(&path_lock);

        let abs = self.tree.resolve(&rel)?;
        let bytes = fs::read(&abs).map_err(|e| RepairError::io(&abs, e))?;
        self.capture(&rel, &bytes, RecordKind::Snapshot, None)
    }

    fn capture(
        &self,
        rel: &str,
        bytes: &[u8],
        kind: RecordKind,
        restored_from: Option<u64>,
    ) -> RepairResult<BackupRecord> {
        let sha256 = sha256_hex(bytes);
        let mut state = lock(&self.state);

        if kind == RecordKind::Snapshot {
            if let Some(last) = state.records.iter().rev().find(|r| r.path == rel) {
                if last.sha256 == sha256 {
                    debug!("Content of {} unchanged since backup #{}", rel, last.seq);
                    return Ok(last.clone());
                }
            }
        }

        let seq = state.next_seq;
        let blob = self.snapshot_path(rel, seq);
        write_atomic(&blob, bytes).map_err(|e| RepairError::backup(&blob, e))?;

        let record = BackupRecord {
            path: rel.to_string(),
            seq,
            sha256,
            size: bytes.len() as u64,
            captured_at: Utc::now(),
            kind,
            restored_from,
        };

        let manifest = self.dir.join(MANIFEST_FILE);
        let line = serde_json::to_string(&record)
            .map_err(|e| RepairError::backup(&manifest, io::Error::new(io::ErrorKind::Other, e)))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&manifest)
            .map_err(|e| RepairError::backup(&manifest, e))?;
        writeln!(file, "{}", line).map_err(|e| RepairError::backup(&manifest, e))?;
        file.sync_all().map_err(|e| RepairError::backup(&manifest, e))?;

        state.next_seq += 1;
        state.records.push(record.clone());
        info!("Backup #{} ({:?}) captured for {}", seq, kind, rel);
        Ok(record)
    }

    /// Load the bytes captured by `record`.
    pub fn content(&self, record: &BackupRecord) -> RepairResult<Vec<u8>> {
        let blob = self.snapshot_path(&record.path, record.seq);
        fs::read(&blob).map_err(|e| RepairError::backup(&blob, e))
    }

    /// Overwrite `rel` with the bytes captured by `record`.
    ///
    /// The content being replaced is snapshotted first, and the restore itself
    /// is appended to the manifest, so history stays linear.
    pub fn restore(&self, rel: &str, record: &BackupRecord) -> RepairResult<BackupRecord> {
        let rel = SourceTree::normalize(rel)?;
        if record.path != rel {
            return Err(RepairError::InvalidArgument(format!(
                "backup #{} belongs to {}, not {}",
                record.seq, record.path, rel
            )));
        }

        let path_lock = self.path_lock(&rel);
        let _guard = lock(&path_lock);

        let content = self.content(record)?;
        if sha256_hex(&content) != record.sha256 {
            return Err(RepairError::backup(
                self.snapshot_path(&rel, record.seq),
                io::Error::new(io::ErrorKind::InvalidData, "backup content does not match its digest"),
            ));
        }

        let abs = self.tree.resolve(&rel)?;
        match fs::read(&abs) {
            Ok(current) if current != content => {
                self.capture(&rel, &current, RecordKind::Snapshot, None)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RepairError::io(&abs, e)),
        }

        write_atomic(&abs, &content).map_err(|e| RepairError::backup(&abs, e))?;
        info!("Restored {} from backup #{}", rel, record.seq);
        self.capture(&rel, &content, RecordKind::Restore, Some(record.seq))
    }

    /// All records, in sequence order.
    pub fn records(&self) -> Vec<BackupRecord> {
        lock(&self.state).records.clone()
    }

    /// Records for one path, in sequence order.
    pub fn list(&self, rel: &str) -> Vec<BackupRecord> {
        let Ok(rel) = SourceTree::normalize(rel) else {
            return Vec::new();
        };
        lock(&self.state)
            .records
            .iter()
            .filter(|r| r.path == rel)
            .cloned()
            .collect()
    }

    pub fn latest(&self, rel: &str) -> Option<BackupRecord> {
        self.list(rel).pop()
    }

    /// Oldest record for a path: the content before the first edit.
    pub fn earliest(&self, rel: &str) -> Option<BackupRecord> {
        self.list(rel).into_iter().next()
    }

    pub fn find(&self, rel: &str, seq: u64) -> Option<BackupRecord> {
        self.list(rel).into_iter().find(|r| r.seq == seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(content: &[u8]) -> (TempDir, TempDir, SourceTree, BackupStore) {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("main.tex"), content).unwrap();
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = BackupStore::open(&tree, backups.path()).unwrap();
        (src, backups, tree, store)
    }

    #[test]
    fn test_snapshot_captures_bytes() {
        let (_src, _bk, _tree, store) = setup(b"\\section{A}\n");
        let record = store.snapshot("main.tex").unwrap();

        assert_eq!(record.seq, 1);
        assert_eq!(record.kind, RecordKind::Snapshot);
        assert_eq!(record.size, 12);
        assert_eq!(store.content(&record).unwrap(), b"\\section{A}\n");
    }

    #[test]
    fn test_snapshot_dedupes_unchanged_content() {
        let (src, _bk, _tree, store) = setup(b"a\n");
        let first = store.snapshot("main.tex").unwrap();
        let again = store.snapshot("./main.tex").unwrap();
        assert_eq!(first.seq, again.seq);
        assert_eq!(store.list("main.tex").len(), 1);

        fs::write(src.path().join("main.tex"), b"b\n").unwrap();
        let changed = store.snapshot("main.tex").unwrap();
        assert_eq!(changed.seq, 2);
    }

    #[test]
    fn test_restore_reproduces_bytes_and_keeps_history() {
        let (src, _bk, _tree, store) = setup(b"original\n");
        let before = store.snapshot("main.tex").unwrap();

        fs::write(src.path().join("main.tex"), b"edited\n").unwrap();
        let restore = store.restore("main.tex", &before).unwrap();

        assert_eq!(fs::read(src.path().join("main.tex")).unwrap(), b"original\n");
        assert_eq!(restore.kind, RecordKind::Restore);
        assert_eq!(restore.restored_from, Some(before.seq));

        // original snapshot, pre-restore snapshot of "edited", restore record
        let history = store.list("main.tex");
        assert_eq!(history.len(), 3);
        assert_eq!(store.content(&history[1]).unwrap(), b"edited\n");
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("main.tex"), b"one").unwrap();
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();

        {
            let store = BackupStore::open(&tree, backups.path()).unwrap();
            store.snapshot("main.tex").unwrap();
        }
        fs::write(src.path().join("main.tex"), b"two").unwrap();

        let store = BackupStore::open(&tree, backups.path()).unwrap();
        assert_eq!(store.records().len(), 1);
        let record = store.snapshot("main.tex").unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(store.earliest("main.tex").unwrap().seq, 1);
        assert!(store.dir().join("tree.json").exists());
    }

    #[test]
    fn test_backup_dir_inside_tree_is_rejected() {
        let src = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let inner = src.path().join("backups");
        let err = BackupStore::open(&tree, &inner).unwrap_err();
        assert!(matches!(err, RepairError::InvalidArgument(_)));
    }

    #[test]
    fn test_snapshot_of_missing_source_is_recoverable() {
        let (_src, _bk, _tree, store) = setup(b"x");
        let err = store.snapshot("missing.tex").unwrap_err();
        assert!(matches!(err, RepairError::Io { .. }));
        assert!(!err.is_fatal());
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_unwritable_store_is_fatal() {
        let (_src, _bk, _tree, store) = setup(b"x");
        // A directory where the blob file should go makes the blob write fail.
        fs::create_dir_all(store.snapshot_path("main.tex", 1)).unwrap();
        let err = store.snapshot("main.tex").unwrap_err();
        assert!(matches!(err, RepairError::Backup { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_concurrent_snapshots_get_unique_sequence_numbers() {
        let src = TempDir::new().unwrap();
        for i in 0..4 {
            fs::write(src.path().join(format!("f{}.tex", i)), format!("{}", i)).unwrap();
        }
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = Arc::new(BackupStore::open(&tree, backups.path()).unwrap());

        std::thread::scope(|s| {
            for i in 0..4 {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    store.snapshot(&format!("f{}.tex", i)).unwrap();
                });
            }
        });

        let mut seqs: Vec<u64> = store.records().iter().map(|r| r.seq).collect();
        seqs.sort();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_snapshot_and_restore_on_one_path_stay_linear() {
        let (src, backups, tree, store) = setup(b"one\n");
        let first = store.snapshot("main.tex").unwrap();
        fs::write(src.path().join("main.tex"), b"two\n").unwrap();
        let second = store.snapshot("main.tex").unwrap();
        let store = Arc::new(store);

        std::thread::scope(|s| {
            for i in 0..6 {
                let store = Arc::clone(&store);
                let target = if i % 2 == 0 { first.clone() } else { second.clone() };
                s.spawn(move || {
                    for _ in 0..5 {
                        if i < 4 {
                            store.restore("main.tex", &target).unwrap();
                        } else {
                            store.snapshot("main.tex").unwrap();
                        }
                    }
                });
            }
        });

        let history = store.list("main.tex");
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
        for record in &history {
            let content = store.content(record).unwrap();
            assert_eq!(sha256_hex(&content), record.sha256);
            if let Some(from) = record.restored_from {
                let source = store.find("main.tex", from).unwrap();
                assert_eq!(content, store.content(&source).unwrap());
            }
        }

        // The file on disk is what the last record says it is.
        let latest = store.latest("main.tex").unwrap();
        assert_eq!(
            fs::read(src.path().join("main.tex")).unwrap(),
            store.content(&latest).unwrap()
        );

        // The manifest on disk holds the same history.
        let reopened = BackupStore::open(&tree, backups.path()).unwrap();
        assert_eq!(reopened.records(), store.records());
    }
}
