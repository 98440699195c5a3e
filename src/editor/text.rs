//! Transient line view over a UTF-8 source file.

use crate::encoding::{decode, detect_bytes, EncodingTag};
use crate::error::{RepairError, RepairResult};

const UTF8_BOM: &str = "\u{FEFF}";

/// A file's lines as read from disk. Lines keep their own `\r` so that
/// untouched lines render back byte-for-byte, whatever the line endings.
#[derive(Debug, Clone)]
pub struct TextFile {
    pub path: String,
    pub encoding: EncodingTag,
    lines: Vec<String>,
    trailing_newline: bool,
    crlf: bool,
}

impl TextFile {
    /// Parse on-disk bytes. Only UTF-8 (with or without BOM) is editable;
    /// anything else must go through the encoding normalizer first.
    pub fn parse(path: &str, bytes: &[u8], gbk_threshold: f64) -> RepairResult<Self> {
        let encoding = detect_bytes(bytes, gbk_threshold);
        let text = if encoding.is_utf8() {
            decode(bytes, encoding)
        } else {
            None
        };
        let Some(text) = text else {
            return Err(RepairError::NotNormalized {
                path: path.to_string(),
                encoding,
            });
        };

        let trailing_newline = text.ends_with('\n');
        let crlf = text.contains("\r\n");
        let body = text.strip_suffix('\n').unwrap_or(&*text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').map(str::to_string).collect()
        };

        Ok(Self {
            path: path.to_string(),
            encoding,
            lines,
            trailing_newline,
            crlf,
        })
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Line `n` (1-indexed) without its line terminator.
    pub fn line(&self, n: usize) -> Option<&str> {
        let raw = self.lines.get(n.checked_sub(1)?)?;
        Some(raw.strip_suffix('\r').unwrap_or(raw))
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|raw| raw.strip_suffix('\r').unwrap_or(raw))
    }

    fn terminated(&self, content: &str, like_crlf: bool) -> String {
        if like_crlf {
            format!("{}\r", content)
        } else {
            content.to_string()
        }
    }

    pub fn replace(&mut self, n: usize, content: &str) {
        let idx = n - 1;
        let was_crlf = self.lines[idx].ends_with('\r');
        self.lines[idx] = self.terminated(content, was_crlf);
    }

    pub fn insert(&mut self, n: usize, content: &str) {
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        let line = self.terminated(content, self.crlf);
        self.lines.insert(n - 1, line);
    }

    /// Replace lines `start..=end` with `content`, which may be shorter or
    /// longer than the range. Replacements at existing positions keep that
    /// position's line ending; extra lines take the file's.
    pub fn splice(&mut self, start: usize, end: usize, content: &[&str]) {
        let replacement: Vec<String> = content
            .iter()
            .enumerate()
            .map(|(offset, line)| {
                let idx = start - 1 + offset;
                let like_crlf = if idx < end {
                    self.lines[idx].ends_with('\r')
                } else {
                    self.crlf
                };
                self.terminated(line, like_crlf)
            })
            .collect();
        self.lines.splice(start - 1..end, replacement);
    }

    pub fn delete(&mut self, n: usize) -> String {
        let mut raw = self.lines.remove(n - 1);
        if raw.ends_with('\r') {
            raw.pop();
        }
        raw
    }

    pub fn render(&self) -> Vec<u8> {
        let mut out = String::new();
        if self.encoding == EncodingTag::Utf8Bom {
            out.push_str(UTF8_BOM);
        }
        out.push_str(&self.lines.join("\n"));
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out.into_bytes()
    }
}
