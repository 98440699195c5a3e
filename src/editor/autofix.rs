//! Deterministic repair pass that needs no decision policy.
//!
//! For one file: snapshot, normalize the encoding, validate, rewrite the
//! lines flagged with a known command typo, and validate again. Typo fixes
//! that leave more errors than before are rolled back to the normalized
//! content.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::lines::LineEditor;
use crate::backup::BackupStore;
use crate::encoding::{decode_lossy, EncodingNormalizer};
use crate::error::{RepairError, RepairResult};
use crate::validator::{fix_typos, validate, validate_document, Diagnostic, TYPO_RULE};
use crate::workspace::SourceTree;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFixReport {
    pub path: String,
    /// Snapshot of the content before the pass.
    pub backup: u64,
    pub fixes: Vec<String>,
    pub rolled_back: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl AutoFixReport {
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

#[derive(Debug, Clone)]
pub struct AutoFixer {
    tree: SourceTree,
    backups: Arc<BackupStore>,
    editor: LineEditor,
    normalizer: EncodingNormalizer,
    gbk_threshold: f64,
}

impl AutoFixer {
    pub fn new(tree: SourceTree, backups: Arc<BackupStore>, gbk_threshold: f64) -> Self {
        let editor = LineEditor::new(tree.clone(), backups.clone(), gbk_threshold);
        let normalizer = EncodingNormalizer::new(tree.clone(), backups.clone(), gbk_threshold);
        Self {
            tree,
            backups,
            editor,
            normalizer,
            gbk_threshold,
        }
    }

    /// Files with a `\documentclass` also get the document-structure checks.
    fn diagnostics(&self, path: &str) -> RepairResult<Vec<Diagnostic>> {
        let bytes = self.tree.read_bytes(path)?;
        let (_, text) = decode_lossy(&bytes, self.gbk_threshold);
        if text.contains("\\documentclass") {
            Ok(validate_document(path, &text))
        } else {
            Ok(validate(path, &text))
        }
    }

    pub fn fix(&self, rel: &str) -> RepairResult<AutoFixReport> {
        let path = SourceTree::normalize(rel)?;
        self.tree.read_bytes(&path)?;
        let original = self.backups.snapshot(&path)?;
        let mut fixes = Vec::new();

        match self.normalizer.normalize(&path) {
            Ok(outcome) if outcome.changed => {
                fixes.push(format!("converted encoding from {} to UTF-8", outcome.from));
            }
            Ok(_) => {}
            Err(err @ RepairError::EncodingConversion { .. }) => {
                warn!("{}; skipping typo fixes", err);
                return Ok(AutoFixReport {
                    diagnostics: self.diagnostics(&path)?,
                    path,
                    backup: original.seq,
                    fixes,
                    rolled_back: false,
                });
            }
            Err(err) => return Err(err),
        }

        let checkpoint = self.backups.snapshot(&path)?;
        let before = self.diagnostics(&path)?;
        let flagged: BTreeSet<usize> = before
            .iter()
            .filter(|d| d.rule == TYPO_RULE)
            .filter_map(|d| d.line)
            .collect();

        let file = self.editor.load(&path)?;
        let edits: Vec<(usize, String)> = flagged
            .into_iter()
            .filter_map(|n| Some((n, fix_typos(file.line(n)?)?)))
            .collect();

        for run in edits.chunk_by(|a, b| b.0 == a.0 + 1) {
            let start = run[0].0;
            let end = run[run.len() - 1].0;
            let lines: Vec<String> = run.iter().map(|(_, line)| line.clone()).collect();
            self.editor.replace_lines(&path, start, end, &lines)?;
        }

        let mut diagnostics = self.diagnostics(&path)?;
        let mut rolled_back = false;
        if !edits.is_empty() && error_count(&diagnostics) > error_count(&before) {
            warn!(
                "Typo fixes left {} with more errors ({} > {}), rolling back",
                path,
                error_count(&diagnostics),
                error_count(&before)
            );
            self.backups.restore(&path, &checkpoint)?;
            diagnostics = before;
            rolled_back = true;
        } else {
            fixes.extend(
                edits
                    .iter()
                    .map(|(n, line)| format!("line {}: {}", n, line.trim())),
            );
        }

        if fixes.is_empty() {
            debug!("Nothing to fix in {}", path);
        } else {
            info!("Applied {} fix(es) to {}", fixes.len(), path);
        }
        Ok(AutoFixReport {
            path,
            backup: original.seq,
            fixes,
            rolled_back,
            diagnostics,
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
        fixer: AutoFixer,
    }

    fn fixture(name: &str, bytes: &[u8]) -> Fixture {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join(name), bytes).unwrap();
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = Arc::new(BackupStore::open(&tree, backups.path()).unwrap());
        let fixer = AutoFixer::new(tree, store.clone(), 0.01);
        Fixture {
            src,
            _backups: backups,
            store,
            fixer,
        }
    }

    impl Fixture {
        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.src.path().join(name)).unwrap()
        }
    }

    #[test]
    fn test_typos_are_fixed_and_backed_up() {
        let original = "\\docmentclass{article}\n\\usepackge{amsmath}\n\\begin{document}\n\\begn{itemize}\n\\item x\n\\end{itemize}\n\\end{document}\n";
        let fx = fixture("main.tex", original.as_bytes());

        let report = fx.fixer.fix("main.tex").unwrap();

        assert!(report.is_clean());
        assert!(!report.rolled_back);
        assert_eq!(report.fixes.len(), 3);
        assert_eq!(
            fx.read("main.tex"),
            "\\documentclass{article}\n\\usepackage{amsmath}\n\\begin{document}\n\\begin{itemize}\n\\item x\n\\end{itemize}\n\\end{document}\n"
        );
        let backup = fx.store.find("main.tex", report.backup).unwrap();
        assert_eq!(fx.store.content(&backup).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_gbk_file_is_normalized_first() {
        let (gbk, _, _) = encoding_rs::GBK.encode("\\section{引言}\n\\begn{quote}中文\\end{quote}\n");
        let fx = fixture("intro.tex", &gbk);

        let report = fx.fixer.fix("intro.tex").unwrap();

        assert!(report.fixes[0].contains("from GBK"));
        assert_eq!(report.fixes.len(), 2);
        assert_eq!(fx.read("intro.tex"), "\\section{引言}\n\\begin{quote}中文\\end{quote}\n");
        assert!(report.is_clean());
    }

    #[test]
    fn test_fix_that_adds_errors_is_rolled_back() {
        // Correcting \begn here opens an environment nothing closes.
        let original = "\\section{A}\n\\begn{itemize}\n\\item x\n";
        let fx = fixture("a.tex", original.as_bytes());

        let report = fx.fixer.fix("a.tex").unwrap();

        assert!(report.rolled_back);
        assert!(report.fixes.is_empty());
        assert_eq!(fx.read("a.tex"), original);
        let restore = fx.store.latest("a.tex").unwrap();
        assert_eq!(restore.restored_from, Some(report.backup));
    }

    #[test]
    fn test_clean_file_is_left_alone() {
        let fx = fixture("a.tex", b"\\section{A}\n");
        let report = fx.fixer.fix("a.tex").unwrap();
        assert!(report.fixes.is_empty());
        assert!(report.is_clean());
        assert_eq!(fx.store.list("a.tex").len(), 1);
    }

    #[test]
    fn test_missing_file_is_recoverable() {
        let fx = fixture("a.tex", b"x");
        let err = fx.fixer.fix("b.tex").unwrap_err();
        assert!(matches!(err, RepairError::Io { .. }));
        assert!(fx.store.records().is_empty());
    }
}
