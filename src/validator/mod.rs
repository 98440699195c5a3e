//! Static structural checks over LaTeX source text.
//!
//! Validation is a pure function of the text: nothing is read from disk and
//! nothing is cached, so diagnostics always describe the current content.
//! Three independent checks run over every file:
//!
//! - brace balance over unescaped `{`/`}`
//! - environment balance over `\begin{..}`/`\end{..}`
//! - the corruption table in [`rules`]
//!
//! The main file additionally gets document-structure checks.

mod lexer;
mod rules;

use std::fmt;

use serde::Serialize;

use lexer::{scan, Scan, Token};
pub use rules::{fix_typos, TYPO_RULE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
    pub rule: &'static str,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        file: &str,
        line: Option<usize>,
        message: impl Into<String>,
        rule: &'static str,
    ) -> Self {
        Self {
            severity,
            file: file.to_string(),
            line,
            message: message.into(),
            rule,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: ", self.file, line)?,
            None => write!(f, "{}: ", self.file)?,
        }
        write!(f, "{}: {} [{}]", self.severity, self.message, self.rule)
    }
}

/// Validate one source file.
pub fn validate(file: &str, text: &str) -> Vec<Diagnostic> {
    check(file, text, false)
}

/// Validate the document's main file, adding `\begin{document}` /
/// `\end{document}` structure checks.
pub fn validate_document(file: &str, text: &str) -> Vec<Diagnostic> {
    check(file, text, true)
}

fn check(file: &str, text: &str, main: bool) -> Vec<Diagnostic> {
    let scan = scan(text);
    let mut out = Vec::new();

    check_braces(file, &scan, &mut out);
    check_environments(file, &scan, main, &mut out);
    if main {
        check_document(file, &scan, &mut out);
    }
    for line in &scan.odd_dollar_lines {
        out.push(Diagnostic::new(
            Severity::Warning,
            file,
            Some(*line),
            "odd number of unescaped $ (possible unclosed math mode)",
            "odd-dollar",
        ));
    }
    rules::check(file, &scan.code, &mut out);

    out.sort_by_key(|d| (d.line.unwrap_or(0), d.severity));
    out
}

fn check_braces(file: &str, scan: &Scan, out: &mut Vec<Diagnostic>) {
    let mut open_lines: Vec<usize> = Vec::new();
    for token in &scan.tokens {
        match token {
            Token::Open { line } => open_lines.push(*line),
            Token::Close { line } => {
                if open_lines.pop().is_none() {
                    out.push(Diagnostic::new(
                        Severity::Error,
                        file,
                        Some(*line),
                        "unexpected closing brace '}'",
                        "brace-unexpected-close",
                    ));
                }
            }
            _ => {}
        }
    }
    for line in open_lines {
        out.push(Diagnostic::new(
            Severity::Error,
            file,
            Some(line),
            "brace '{' opened here is never closed",
            "brace-unclosed",
        ));
    }
}

fn check_environments(file: &str, scan: &Scan, main: bool, out: &mut Vec<Diagnostic>) {
    let mut stack: Vec<(&str, usize)> = Vec::new();

    for token in &scan.tokens {
        match token {
            Token::Begin { name, line } => stack.push((name.as_str(), *line)),
            Token::End { name, line } => {
                let Some(pos) = stack.iter().rposition(|(open, _)| *open == name.as_str()) else {
                    out.push(Diagnostic::new(
                        Severity::Error,
                        file,
                        Some(*line),
                        format!("\\end{{{}}} without matching \\begin", name),
                        "env-unmatched-end",
                    ));
                    continue;
                };
                for (open, open_line) in stack.drain(pos + 1..).rev() {
                    out.push(Diagnostic::new(
                        Severity::Error,
                        file,
                        Some(*line),
                        format!(
                            "\\end{{{}}} closes \\begin{{{}}} from line {} first",
                            name, open, open_line
                        ),
                        "env-mismatch",
                    ));
                }
                stack.pop();
            }
            _ => {}
        }
    }

    for (name, line) in stack {
        // The document checks report a missing \end{document} on the main file.
        if main && name == "document" {
            continue;
        }
        out.push(Diagnostic::new(
            Severity::Error,
            file,
            Some(line),
            format!("environment {} opened on line {} is never closed", name, line),
            "env-unclosed",
        ));
    }
}

fn check_document(file: &str, scan: &Scan, out: &mut Vec<Diagnostic>) {
    let begins = scan
        .tokens
        .iter()
        .any(|t| matches!(t, Token::Begin { name, .. } if name == "document"));
    let end_line = scan.tokens.iter().find_map(|t| match t {
        Token::End { name, line } if name == "document" => Some(*line),
        _ => None,
    });

    if !begins {
        out.push(Diagnostic::new(
            Severity::Error,
            file,
            None,
            "missing \\begin{document}",
            "document-missing-begin",
        ));
    }
    let Some(end_line) = end_line else {
        out.push(Diagnostic::new(
            Severity::Error,
            file,
            None,
            "missing \\end{document}",
            "document-missing-end",
        ));
        return;
    };

    let marker = "\\end{document}";
    let same_line_rest = scan.code[end_line - 1]
        .find(marker)
        .map(|pos| &scan.code[end_line - 1][pos + marker.len()..])
        .unwrap_or_default();
    let trailing = if !same_line_rest.trim().is_empty() {
        Some(end_line)
    } else {
        scan.code[end_line..]
            .iter()
            .position(|code| !code.trim().is_empty())
            .map(|offset| end_line + offset + 1)
    };
    if let Some(line) = trailing {
        out.push(Diagnostic::new(
            Severity::Warning,
            file,
            Some(line),
            "content after \\end{document} is ignored",
            "document-trailing-content",
        ));
    }
}

/// Render diagnostics as a plain-text report.
pub fn format_report(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return "No problems found.".to_string();
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    let warnings = diagnostics.len() - errors;
    let mut report = format!("{} error(s), {} warning(s)\n", errors, warnings);
    for diagnostic in diagnostics {
        report.push_str(&diagnostic.to_string());
        report.push('\n');
    }
    report
}
