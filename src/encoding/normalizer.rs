//! Converts source files to BOM-less UTF-8.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::detect::{decode, detect_bytes, EncodingTag};
use crate::backup::BackupStore;
use crate::error::{RepairError, RepairResult};
use crate::workspace::SourceTree;

const SAMPLE_CHARS: usize = 100;

/// What `detectEncoding` reports about one file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingReport {
    pub path: String,
    pub encoding: EncodingTag,
    pub has_bom: bool,
    /// Whether the bytes decode cleanly under `encoding`.
    pub valid: bool,
    pub size: usize,
    pub sample: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeOutcome {
    pub path: String,
    pub from: EncodingTag,
    pub changed: bool,
    /// Sequence number of the snapshot taken before conversion.
    pub backup: u64,
}

#[derive(Debug, Clone)]
pub struct EncodingNormalizer {
    tree: SourceTree,
    backups: Arc<BackupStore>,
    gbk_threshold: f64,
}

impl EncodingNormalizer {
    pub fn new(tree: SourceTree, backups: Arc<BackupStore>, gbk_threshold: f64) -> Self {
        Self {
            tree,
            backups,
            gbk_threshold,
        }
    }

    pub fn detect(&self, rel: &str) -> RepairResult<EncodingReport> {
        let path = SourceTree::normalize(rel)?;
        let bytes = self.tree.read_bytes(&path)?;
        let encoding = detect_bytes(&bytes, self.gbk_threshold);
        let decoded = decode(&bytes, encoding);

        let sample = match &decoded {
            Some(text) => text.chars().take(SAMPLE_CHARS).collect(),
            None => String::from_utf8_lossy(&bytes)
                .chars()
                .take(SAMPLE_CHARS)
                .collect(),
        };
        debug!("Detected {} for {}", encoding, path);

        Ok(EncodingReport {
            path,
            encoding,
            has_bom: encoding.has_bom(),
            valid: decoded.is_some(),
            size: bytes.len(),
            sample,
        })
    }

    /// Snapshot, decode under the detected tag, and write UTF-8 back only when
    /// the bytes actually change. A decode failure leaves the file untouched.
    ///
    /// Every leading U+FEFF is dropped, so the output never starts with a
    /// byte-order mark and a second run is a no-op.
    pub fn normalize(&self, rel: &str) -> RepairResult<NormalizeOutcome> {
        let path = SourceTree::normalize(rel)?;
        let bytes = self.tree.read_bytes(&path)?;
        let record = self.backups.snapshot(&path)?;

        let from = detect_bytes(&bytes, self.gbk_threshold);
        let Some(text) = decode(&bytes, from) else {
            warn!("{} does not decode as {}, leaving it untouched", path, from);
            return Err(RepairError::EncodingConversion {
                path,
                encoding: from,
            });
        };

        let converted = text.trim_start_matches('\u{FEFF}').as_bytes();
        let changed = converted != bytes.as_slice();
        if changed {
            self.tree.write_bytes(&path, converted)?;
            info!("Converted {} from {} to UTF-8", path, from);
        } else {
            debug!("{} is already UTF-8", path);
        }

        Ok(NormalizeOutcome {
            path,
            from,
            changed,
            backup: record.seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        src: TempDir,
        _backups: TempDir,
        store: Arc<BackupStore>,
        normalizer: EncodingNormalizer,
    }

    fn fixture(name: &str, bytes: &[u8]) -> Fixture {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join(name), bytes).unwrap();
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = Arc::new(BackupStore::open(&tree, backups.path()).unwrap());
        let normalizer = EncodingNormalizer::new(tree, store.clone(), 0.01);
        Fixture {
            src,
            _backups: backups,
            store,
            normalizer,
        }
    }

    #[test]
    fn test_bom_file_is_stripped_and_backed_up() {
        let original = b"\xEF\xBB\xBF\\documentclass{article}\n";
        let fx = fixture("main.tex", original);

        let report = fx.normalizer.detect("main.tex").unwrap();
        assert_eq!(report.encoding.to_string(), "UTF-8-BOM");
        assert!(report.has_bom);
        assert!(report.valid);

        let outcome = fx.normalizer.normalize("main.tex").unwrap();
        assert!(outcome.changed);
        assert_eq!(
            fs::read(fx.src.path().join("main.tex")).unwrap(),
            b"\\documentclass{article}\n"
        );

        let backup = fx.store.find("main.tex", outcome.backup).unwrap();
        assert_eq!(fx.store.content(&backup).unwrap(), original);
    }

    #[test]
    fn test_normalizing_utf8_is_a_byte_for_byte_noop() {
        let fx = fixture("main.tex", "\\title{中文}\n".as_bytes());
        let path = fx.src.path().join("main.tex");
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let first = fx.normalizer.normalize("main.tex").unwrap();
        let second = fx.normalizer.normalize("main.tex").unwrap();

        assert!(!first.changed);
        assert!(!second.changed);
        assert_eq!(first.backup, second.backup);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), mtime);
        assert_eq!(fs::read(&path).unwrap(), "\\title{中文}\n".as_bytes());
    }

    #[test]
    fn test_gbk_file_is_converted_then_detects_as_utf8() {
        let (gbk, _, _) = encoding_rs::GBK.encode("\\section{引言}\n中文内容\n");
        let fx = fixture("intro.tex", &gbk);

        assert_eq!(fx.normalizer.detect("intro.tex").unwrap().encoding, EncodingTag::Gbk);
        let outcome = fx.normalizer.normalize("intro.tex").unwrap();
        assert_eq!(outcome.from, EncodingTag::Gbk);
        assert!(outcome.changed);

        let report = fx.normalizer.detect("intro.tex").unwrap();
        assert_eq!(report.encoding, EncodingTag::Utf8);
        assert_eq!(report.sample, "\\section{引言}\n中文内容\n");
    }

    #[test]
    fn test_utf16_is_converted() {
        let fx = fixture("a.tex", b"\xFF\xFE\\\x00a\x00\n\x00");
        let outcome = fx.normalizer.normalize("a.tex").unwrap();
        assert_eq!(outcome.from, EncodingTag::Utf16Le);
        assert_eq!(fs::read(fx.src.path().join("a.tex")).unwrap(), b"\\a\n");
    }

    #[test]
    fn test_repeated_bom_is_fully_stripped() {
        let fx = fixture("main.tex", b"\xEF\xBB\xBF\xEF\xBB\xBF\\section{A}\n");

        let first = fx.normalizer.normalize("main.tex").unwrap();
        assert!(first.changed);
        let path = fx.src.path().join("main.tex");
        assert_eq!(fs::read(&path).unwrap(), b"\\section{A}\n");
        assert_eq!(fx.normalizer.detect("main.tex").unwrap().encoding, EncodingTag::Utf8);

        let second = fx.normalizer.normalize("main.tex").unwrap();
        assert!(!second.changed);
    }

    #[test]
    fn test_utf16_with_inner_bom_is_fully_stripped() {
        let fx = fixture("a.tex", b"\xFF\xFE\xFF\xFEa\x00\n\x00");
        fx.normalizer.normalize("a.tex").unwrap();
        assert_eq!(fs::read(fx.src.path().join("a.tex")).unwrap(), b"a\n");
    }

    #[test]
    fn test_missing_file_fails_before_any_backup() {
        let fx = fixture("main.tex", b"x");
        let err = fx.normalizer.normalize("mian.tex").unwrap_err();
        assert!(matches!(err, RepairError::Io { .. }));
        assert!(!err.is_fatal());
        assert!(fx.store.records().is_empty());
    }

    #[test]
    fn test_undecodable_file_is_left_untouched() {
        let bad = b"\xFE\xFF\x00";
        let fx = fixture("bad.tex", bad);

        let err = fx.normalizer.normalize("bad.tex").unwrap_err();
        assert!(matches!(err, RepairError::EncodingConversion { .. }));
        assert!(!err.is_fatal());
        assert_eq!(fs::read(fx.src.path().join("bad.tex")).unwrap(), bad);
    }
}
