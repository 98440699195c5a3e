//! Executes [`ToolCall`]s against one source tree.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tracing::{debug, info};

use super::call::ToolCall;
use crate::backup::BackupStore;
use crate::compiler::{CompileOutcome, CompilerInvoker};
use crate::editor::LineEditor;
use crate::encoding::{decode_lossy, EncodingNormalizer};
use crate::error::{RepairError, RepairResult};
use crate::validator::{format_report, validate, validate_document, Diagnostic};
use crate::workspace::{list_sources, search_sources, SourceTree};

/// Limits and tunables for tool execution.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub gbk_threshold: f64,
    pub read_limit_bytes: usize,
    pub compile_timeout: Duration,
}

/// Result of one successful tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Text handed back to the decision policy.
    pub text: String,
    /// Files whose on-disk bytes this call changed.
    pub changed: Vec<String>,
    /// Set for `compile` and `fixComplete`.
    pub compile: Option<CompileOutcome>,
}

impl ToolOutput {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Shared handle for everything a tool call may touch. Cloning is cheap.
#[derive(Clone)]
pub struct ToolExecutor {
    tree: SourceTree,
    main_file: String,
    backups: Arc<BackupStore>,
    editor: LineEditor,
    normalizer: EncodingNormalizer,
    compiler: Arc<dyn CompilerInvoker>,
    options: ExecutorOptions,
}

/// Cut `text` to about `limit` bytes, keeping its head and tail.
fn truncate_middle(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let half = limit / 2;
    let mut head_end = half;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - half;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n... [{} bytes omitted; use readLines for this region] ...\n{}",
        &text[..head_end],
        tail_start - head_end,
        &text[tail_start..]
    )
}

impl ToolExecutor {
    pub fn new(
        tree: SourceTree,
        main_file: &str,
        backups: Arc<BackupStore>,
        compiler: Arc<dyn CompilerInvoker>,
        options: ExecutorOptions,
    ) -> RepairResult<Self> {
        let main_file = SourceTree::normalize(main_file)?;
        let editor = LineEditor::new(tree.clone(), backups.clone(), options.gbk_threshold);
        let normalizer =
            EncodingNormalizer::new(tree.clone(), backups.clone(), options.gbk_threshold);
        Ok(Self {
            tree,
            main_file,
            backups,
            editor,
            normalizer,
            compiler,
            options,
        })
    }

    pub fn tree(&self) -> &SourceTree {
        &self.tree
    }

    pub fn main_file(&self) -> &str {
        &self.main_file
    }

    pub fn main_path(&self) -> PathBuf {
        self.tree.root().join(&self.main_file)
    }

    pub fn list_files(&self) -> Vec<String> {
        list_sources(self.tree.root())
    }

    /// Validate the current on-disk content of one file. Non-UTF-8 bytes are
    /// decoded lossily, which the corruption rules then report.
    pub fn diagnostics_for(&self, rel: &str) -> RepairResult<Vec<Diagnostic>> {
        let path = SourceTree::normalize(rel)?;
        let bytes = self.tree.read_bytes(&path)?;
        let (_, text) = decode_lossy(&bytes, self.options.gbk_threshold);
        if path == self.main_file {
            Ok(validate_document(&path, &text))
        } else {
            Ok(validate(&path, &text))
        }
    }

    /// Run the compiler on the main file under the configured timeout.
    pub async fn compile(&self) -> RepairResult<CompileOutcome> {
        let main = self.main_path();
        match tokio::time::timeout(self.options.compile_timeout, self.compiler.compile(&main)).await {
            Ok(result) => result,
            Err(_) => Err(RepairError::CompilerUnavailable(format!(
                "compile timed out after {}s",
                self.options.compile_timeout.as_secs()
            ))),
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> RepairResult<ToolOutput> {
        debug!("Executing {}", call.name());
        match call {
            ToolCall::Read(args) => {
                let path = SourceTree::normalize(&args.file)?;
                let bytes = self.tree.read_bytes(&path)?;
                let (encoding, text) = decode_lossy(&bytes, self.options.gbk_threshold);
                let mut numbered = String::new();
                for (idx, line) in text.lines().enumerate() {
                    numbered.push_str(&format!("{}: {}\n", idx + 1, line));
                }
                Ok(ToolOutput::text(format!(
                    "{} ({}, {} lines)\n{}",
                    path,
                    encoding,
                    text.lines().count(),
                    truncate_middle(&numbered, self.options.read_limit_bytes)
                )))
            }
            ToolCall::ReadLines(args) => {
                let slice = self.editor.read(&args.file, args.start, args.end)?;
                Ok(ToolOutput::text(format!(
                    "{} lines {}-{} of {}\n{}",
                    slice.path,
                    slice.start,
                    slice.end,
                    slice.total,
                    slice.numbered()
                )))
            }
            ToolCall::ReplaceLine(args) => {
                let outcome = self.editor.replace_line(&args.file, args.line, &args.content)?;
                Ok(ToolOutput {
                    text: if outcome.changed {
                        format!("Replaced line {} of {} (backup #{})", outcome.line, outcome.path, outcome.backup)
                    } else {
                        format!("Line {} of {} already had that content", outcome.line, outcome.path)
                    },
                    changed: if outcome.changed { vec![outcome.path] } else { Vec::new() },
                    compile: None,
                })
            }
            ToolCall::InsertLine(args) => {
                let outcome = self.editor.insert_line(&args.file, args.line, &args.content)?;
                Ok(ToolOutput {
                    text: format!(
                        "Inserted line {} into {}; it now has {} lines (backup #{})",
                        outcome.line, outcome.path, outcome.total_lines, outcome.backup
                    ),
                    changed: vec![outcome.path],
                    compile: None,
                })
            }
            ToolCall::DeleteLine(args) => {
                let outcome = self.editor.delete_line(&args.file, args.line)?;
                Ok(ToolOutput {
                    text: format!(
                        "Deleted line {} of {}; it now has {} lines (backup #{})",
                        outcome.line, outcome.path, outcome.total_lines, outcome.backup
                    ),
                    changed: vec![outcome.path],
                    compile: None,
                })
            }
            ToolCall::DetectEncoding(args) => {
                let report = self.normalizer.detect(&args.file)?;
                Ok(ToolOutput::text(
                    json!({
                        "file": report.path,
                        "encoding": report.encoding,
                        "hasBom": report.has_bom,
                        "valid": report.valid,
                        "size": report.size,
                        "sample": report.sample,
                    })
                    .to_string(),
                ))
            }
            ToolCall::FixEncoding(args) => {
                let outcome = self.normalizer.normalize(&args.file)?;
                let text = if outcome.changed {
                    format!(
                        "Converted {} from {} to UTF-8 (backup #{})",
                        outcome.path, outcome.from, outcome.backup
                    )
                } else {
                    format!("{} is already UTF-8 without BOM", outcome.path)
                };
                Ok(ToolOutput {
                    text,
                    changed: if outcome.changed { vec![outcome.path] } else { Vec::new() },
                    compile: None,
                })
            }
            ToolCall::Validate(args) => {
                let diagnostics = self.diagnostics_for(&args.file)?;
                Ok(ToolOutput::text(format_report(&diagnostics)))
            }
            ToolCall::CreateBackup(args) => {
                let record = self.backups.snapshot(&args.file)?;
                Ok(ToolOutput::text(format!(
                    "Backup #{} of {} ({} bytes, sha256 {})",
                    record.seq,
                    record.path,
                    record.size,
                    &record.sha256[..12.min(record.sha256.len())]
                )))
            }
            ToolCall::RestoreBackup(args) => {
                let path = SourceTree::normalize(&args.file)?;
                let record = match args.seq {
                    Some(seq) => self.backups.find(&path, seq),
                    None => self.backups.latest(&path),
                }
                .ok_or_else(|| {
                    RepairError::InvalidArgument(match args.seq {
                        Some(seq) => format!("no backup #{} for {}", seq, path),
                        None => format!("no backups for {}", path),
                    })
                })?;
                let before = self.tree.read_bytes(&path).ok();
                let restore = self.backups.restore(&path, &record)?;
                let changed = self.tree.read_bytes(&path).ok() != before;
                info!("Restored {} to backup #{}", path, record.seq);
                Ok(ToolOutput {
                    text: format!(
                        "Restored {} to backup #{} (recorded as #{})",
                        path, record.seq, restore.seq
                    ),
                    changed: if changed { vec![path] } else { Vec::new() },
                    compile: None,
                })
            }
            ToolCall::ListFiles(_) => {
                let files = self.list_files();
                if files.is_empty() {
                    return Ok(ToolOutput::text("No source files found"));
                }
                Ok(ToolOutput::text(files.join("\n")))
            }
            ToolCall::SearchFiles(args) => {
                let pattern = Regex::new(&args.pattern).map_err(|e| {
                    RepairError::InvalidArgument(format!("invalid pattern {:?}: {}", args.pattern, e))
                })?;
                let hits = search_sources(self.tree.root(), &pattern);
                if hits.is_empty() {
                    return Ok(ToolOutput::text(format!("No matches for {:?}", args.pattern)));
                }
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("{}:{}: {}", h.path, h.line, h.text))
                    .collect();
                Ok(ToolOutput::text(lines.join("\n")))
            }
            ToolCall::Compile(_) | ToolCall::FixComplete(_) => {
                let outcome = self.compile().await?;
                let text = if outcome.success {
                    "Compilation succeeded".to_string()
                } else {
                    match outcome.first_error() {
                        Some(err) => format!(
                            "Compilation failed: {}{}",
                            err.message,
                            match (&err.file, err.line) {
                                (Some(file), Some(line)) => format!(" ({}:{})", file, line),
                                (None, Some(line)) => format!(" (line {})", line),
                                (Some(file), None) => format!(" ({})", file),
                                (None, None) => String::new(),
                            }
                        ),
                        None => "Compilation failed without a recognizable error line".to_string(),
                    }
                };
                Ok(ToolOutput {
                    text,
                    changed: Vec::new(),
                    compile: Some(outcome),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_middle_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(50), "b".repeat(50));
        let cut = truncate_middle(&text, 20);
        assert!(cut.starts_with("aaaaaaaaaa\n"));
        assert!(cut.ends_with("\nbbbbbbbbbb"));
        assert!(cut.contains("80 bytes omitted"));
        assert_eq!(truncate_middle("short", 20), "short");
    }

    #[test]
    fn test_truncate_middle_respects_char_boundaries() {
        let text = "中".repeat(20);
        let cut = truncate_middle(&text, 10);
        assert!(cut.starts_with("中"));
        assert!(cut.ends_with("中"));
    }
}
