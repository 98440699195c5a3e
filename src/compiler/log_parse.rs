//! Extraction of the first error from a TeX engine log.
//!
//! Later errors are usually cascades of the first one, so only the first is
//! located precisely; the excerpt gives the policy surrounding context.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const CONTEXT_BEFORE: usize = 5;
const CONTEXT_AFTER: usize = 15;
/// How far after a `! ` line to look for its `l.<n>` marker.
const LINE_MARKER_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileError {
    pub file: Option<String>,
    pub line: Option<usize>,
    pub message: String,
}

struct Patterns {
    file_line_error: Regex,
    line_marker: Regex,
    file_open: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                file_line_error: Regex::new(r"^(\.?/?[^:\s][^:]*\.tex):(\d+): (.+)$").ok()?,
                line_marker: Regex::new(r"^l\.(\d+)").ok()?,
                file_open: Regex::new(r"\(\.?/?([^()\s]+\.tex)").ok()?,
            })
        })
        .as_ref()
}

fn clean_file(name: &str) -> String {
    name.trim_start_matches("./").to_string()
}

fn first_error_index(lines: &[&str], p: &Patterns) -> Option<usize> {
    lines
        .iter()
        .position(|l| l.starts_with("! ") || p.file_line_error.is_match(l))
}

/// Locate the first error in `log`: its message, and where known the source
/// file and line it points at.
pub fn first_error(log: &str) -> Option<CompileError> {
    let p = patterns()?;
    let lines: Vec<&str> = log.lines().collect();
    let idx = first_error_index(&lines, p)?;
    let line = lines[idx];

    if let Some(caps) = p.file_line_error.captures(line) {
        return Some(CompileError {
            file: Some(clean_file(&caps[1])),
            line: caps[2].parse().ok(),
            message: caps[3].trim().to_string(),
        });
    }

    let message = line.trim_start_matches('!').trim().to_string();
    let source_line = lines[idx + 1..]
        .iter()
        .take(LINE_MARKER_WINDOW)
        .find_map(|l| p.line_marker.captures(l))
        .and_then(|caps| caps[1].parse().ok());
    let preceding = lines[..idx].join("\n");
    let file = p
        .file_open
        .captures_iter(&preceding)
        .last()
        .map(|caps| clean_file(&caps[1]));

    Some(CompileError {
        file,
        line: source_line,
        message,
    })
}

fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// A bounded excerpt of `log`: the first error with surrounding lines, or
/// the tail of the log when no error line is recognized.
pub fn log_excerpt(log: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let idx = patterns().and_then(|p| first_error_index(&lines, p));

    match idx {
        Some(idx) => {
            let start = idx.saturating_sub(CONTEXT_BEFORE);
            let end = (idx + CONTEXT_AFTER + 1).min(lines.len());
            let block = lines[start..end].join("\n");
            block.chars().take(max_chars).collect()
        }
        None => truncate_tail(log, max_chars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "This is XeTeX, Version 3.141592653\n\
(./main.tex\n\
LaTeX2e <2023-11-01>\n\
(./sections/intro.tex\n\
! Missing } inserted.\n\
<inserted text>\n\
                }\n\
l.42 \\end{figure*}\n\
\n\
! Emergency stop.\n";

    #[test]
    fn test_first_error_with_file_and_line() {
        let err = first_error(LOG).unwrap();
        assert_eq!(err.message, "Missing } inserted.");
        assert_eq!(err.file.as_deref(), Some("sections/intro.tex"));
        assert_eq!(err.line, Some(42));
    }

    #[test]
    fn test_file_line_error_format() {
        let log = "(./main.tex\n./main.tex:17: Undefined control sequence.\nl.17 \\foo\n";
        let err = first_error(log).unwrap();
        assert_eq!(err.file.as_deref(), Some("main.tex"));
        assert_eq!(err.line, Some(17));
        assert_eq!(err.message, "Undefined control sequence.");
    }

    #[test]
    fn test_no_error_in_clean_log() {
        assert!(first_error("Output written on main.pdf (1 page).\n").is_none());
    }

    #[test]
    fn test_excerpt_centers_on_first_error() {
        let excerpt = log_excerpt(LOG, 10_000);
        assert!(excerpt.contains("! Missing } inserted."));
        assert!(excerpt.contains("l.42"));
    }

    #[test]
    fn test_excerpt_falls_back_to_tail() {
        let log = format!("{}END", "x".repeat(100));
        assert_eq!(log_excerpt(&log, 5), "xxEND");
    }
}
