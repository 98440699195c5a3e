//! Line-addressed read and edit operations.
//!
//! Every mutation validates its arguments against the current on-disk file,
//! snapshots the file through the backup store, then writes the whole file
//! back atomically. Line numbers always refer to the file as it is now.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::text::TextFile;
use crate::backup::BackupStore;
use crate::error::{RepairError, RepairResult};
use crate::workspace::SourceTree;

/// A contiguous run of lines returned by [`LineEditor::read`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSlice {
    pub path: String,
    pub start: usize,
    pub end: usize,
    pub total: usize,
    pub lines: Vec<String>,
}

impl LineSlice {
    /// Render as `<n>: <text>` lines, the form handed to the decision policy.
    pub fn numbered(&self) -> String {
        let width = self.end.max(1).to_string().len();
        let mut out = String::new();
        for (offset, line) in self.lines.iter().enumerate() {
            let _ = writeln!(out, "{:>width$}: {}", self.start + offset, line, width = width);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub path: String,
    pub line: usize,
    pub total_lines: usize,
    /// False when the edit left the file's bytes as they were.
    pub changed: bool,
    /// Sequence number of the snapshot taken before the edit.
    pub backup: u64,
}

#[derive(Debug, Clone)]
pub struct LineEditor {
    tree: SourceTree,
    backups: Arc<BackupStore>,
    gbk_threshold: f64,
}

fn single_line(content: &str) -> RepairResult<&str> {
    if content.contains('\n') || content.contains('\r') {
        return Err(RepairError::InvalidArgument(
            "content must be a single line without line breaks".into(),
        ));
    }
    Ok(content)
}

impl LineEditor {
    pub fn new(tree: SourceTree, backups: Arc<BackupStore>, gbk_threshold: f64) -> Self {
        Self {
            tree,
            backups,
            gbk_threshold,
        }
    }

    /// Load the authoritative on-disk view of `rel`.
    pub fn load(&self, rel: &str) -> RepairResult<TextFile> {
        let path = SourceTree::normalize(rel)?;
        let bytes = self.tree.read_bytes(&path)?;
        TextFile::parse(&path, &bytes, self.gbk_threshold)
    }

    /// Return lines `start..=end`. Omitted bounds mean the first and last
    /// line; `end` is clamped to the file length.
    pub fn read(&self, rel: &str, start: Option<usize>, end: Option<usize>) -> RepairResult<LineSlice> {
        let file = self.load(rel)?;
        let total = file.line_count();

        if total == 0 && start.is_none() {
            return Ok(LineSlice {
                path: file.path,
                start: 1,
                end: 0,
                total,
                lines: Vec::new(),
            });
        }

        let first = start.unwrap_or(1);
        if first == 0 || first > total {
            return Err(RepairError::OutOfRange {
                path: file.path,
                line: first,
                total,
            });
        }
        let last = end.unwrap_or(total).min(total);
        if last < first {
            return Err(RepairError::InvalidArgument(format!(
                "end line {} precedes start line {}",
                last, first
            )));
        }

        let lines = file
            .lines()
            .skip(first - 1)
            .take(last - first + 1)
            .map(str::to_string)
            .collect();
        Ok(LineSlice {
            path: file.path,
            start: first,
            end: last,
            total,
            lines,
        })
    }

    fn check_range(file: &TextFile, line: usize, max: usize) -> RepairResult<()> {
        if line == 0 || line > max {
            return Err(RepairError::OutOfRange {
                path: file.path.clone(),
                line,
                total: file.line_count(),
            });
        }
        Ok(())
    }

    fn commit(&self, file: &TextFile, line: usize, backup: u64) -> RepairResult<EditOutcome> {
        self.tree.write_bytes(&file.path, &file.render())?;
        Ok(EditOutcome {
            path: file.path.clone(),
            line,
            total_lines: file.line_count(),
            changed: true,
            backup,
        })
    }

    /// Overwrite line `line`, which must be within `1..=lineCount`.
    pub fn replace_line(&self, rel: &str, line: usize, content: &str) -> RepairResult<EditOutcome> {
        let content = single_line(content)?;
        let mut file = self.load(rel)?;
        Self::check_range(&file, line, file.line_count())?;

        let record = self.backups.snapshot(&file.path)?;
        if file.line(line) == Some(content) {
            debug!("Line {} of {} is unchanged", line, file.path);
            return Ok(EditOutcome {
                path: file.path.clone(),
                line,
                total_lines: file.line_count(),
                changed: false,
                backup: record.seq,
            });
        }
        file.replace(line, content);
        info!("Replaced line {} of {}", line, file.path);
        self.commit(&file, line, record.seq)
    }

    /// Insert a new line at `line`; `lineCount + 1` appends.
    pub fn insert_line(&self, rel: &str, line: usize, content: &str) -> RepairResult<EditOutcome> {
        let content = single_line(content)?;
        let mut file = self.load(rel)?;
        Self::check_range(&file, line, file.line_count() + 1)?;

        let record = self.backups.snapshot(&file.path)?;
        file.insert(line, content);
        info!("Inserted line {} into {}", line, file.path);
        self.commit(&file, line, record.seq)
    }

    /// Replace lines `start..=end` with `content`, one entry per new line.
    /// An empty `content` deletes the range.
    pub fn replace_lines(
        &self,
        rel: &str,
        start: usize,
        end: usize,
        content: &[String],
    ) -> RepairResult<EditOutcome> {
        let content = content
            .iter()
            .map(|line| single_line(line))
            .collect::<RepairResult<Vec<&str>>>()?;
        let mut file = self.load(rel)?;
        Self::check_range(&file, start, file.line_count())?;
        Self::check_range(&file, end, file.line_count())?;
        if end < start {
            return Err(RepairError::InvalidArgument(format!(
                "end line {} precedes start line {}",
                end, start
            )));
        }

        let record = self.backups.snapshot(&file.path)?;
        let unchanged = end - start + 1 == content.len()
            && (start..=end).zip(&content).all(|(n, new)| file.line(n) == Some(*new));
        if unchanged {
            debug!("Lines {}-{} of {} are unchanged", start, end, file.path);
            return Ok(EditOutcome {
                path: file.path.clone(),
                line: start,
                total_lines: file.line_count(),
                changed: false,
                backup: record.seq,
            });
        }
        file.splice(start, end, &content);
        info!(
            "Replaced lines {}-{} of {} with {} line(s)",
            start,
            end,
            file.path,
            content.len()
        );
        self.commit(&file, start, record.seq)
    }

    pub fn delete_line(&self, rel: &str, line: usize) -> RepairResult<EditOutcome> {
        let mut file = self.load(rel)?;
        Self::check_range(&file, line, file.line_count())?;

        let record = self.backups.snapshot(&file.path)?;
        let removed = file.delete(line);
        info!("Deleted line {} of {}: {}", line, file.path, removed);
        self.commit(&file, line, record.seq)
    }
}
