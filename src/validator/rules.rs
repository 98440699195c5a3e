//! Table of text patterns known to come from mistranslated or mis-decoded
//! control sequences. Every match is a warning carrying the rule id.

use std::sync::OnceLock;

use regex::Regex;
use tracing::error;

use super::{Diagnostic, Severity};

struct Rule {
    id: &'static str,
    pattern: &'static str,
    message: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        id: "non-ascii-command",
        // An odd run of backslashes followed by a name with non-ASCII letters.
        pattern: r"(?:^|[^\\])(?:\\\\)*(\\[A-Za-z]*[\p{L}&&[^A-Za-z]]\p{L}*)",
        message: "command name contains non-ASCII letters",
    },
    Rule {
        id: "extra-brace-after-end",
        pattern: r"(\\end\{[^}]+\}\}+)",
        message: "closing brace directly after an environment end",
    },
    Rule {
        id: "fullwidth-brace",
        pattern: r"([｛｝])",
        message: "full-width brace where a TeX brace is expected",
    },
    Rule {
        id: "fullwidth-backslash",
        pattern: r"(＼[A-Za-z]*)",
        message: "full-width backslash in place of a command escape",
    },
    Rule {
        id: "mojibake",
        pattern: r"(锟斤拷|鎮ㄧ殑|烫烫烫|屯屯屯)",
        message: "text decoded with the wrong encoding",
    },
    Rule {
        id: "replacement-char",
        pattern: "(\u{FFFD}+)",
        message: "Unicode replacement character from a lossy conversion",
    },
    Rule {
        id: "stray-bom",
        pattern: "(\u{FEFF})",
        message: "byte-order mark inside the text",
    },
];

/// Rule id of command-name typo diagnostics.
pub const TYPO_RULE: &str = "command-typo";

const TYPOS: &[(&str, &str)] = &[
    ("begn", "begin"),
    ("ened", "end"),
    ("docmentclass", "documentclass"),
    ("usepackge", "usepackage"),
];

fn compiled_rules() -> &'static [(&'static Rule, Regex)] {
    static COMPILED: OnceLock<Vec<(&'static Rule, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|rule| match Regex::new(rule.pattern) {
                Ok(re) => Some((rule, re)),
                Err(e) => {
                    error!("Skipping corruption rule {}: {}", rule.id, e);
                    None
                }
            })
            .collect()
    })
}

fn typo_pattern() -> Option<&'static Regex> {
    static TYPO: OnceLock<Option<Regex>> = OnceLock::new();
    TYPO.get_or_init(|| {
        let names: Vec<&str> = TYPOS.iter().map(|(typo, _)| *typo).collect();
        let pattern = format!(r"(?:^|[^\\])(?:\\\\)*\\({})(?:[^A-Za-z]|$)", names.join("|"));
        match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                error!("Skipping typo rule: {}", e);
                None
            }
        }
    })
    .as_ref()
}

/// Run the corruption table over comment-stripped code lines.
pub fn check(file: &str, code: &[String], out: &mut Vec<Diagnostic>) {
    for (idx, line) in code.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;

        for (rule, re) in compiled_rules() {
            for caps in re.captures_iter(line) {
                let matched = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                out.push(Diagnostic::new(
                    Severity::Warning,
                    file,
                    Some(line_no),
                    format!("{}: {}", rule.message, matched.trim()),
                    rule.id,
                ));
            }
        }

        if let Some(re) = typo_pattern() {
            for caps in re.captures_iter(line) {
                let typo = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let fix = TYPOS
                    .iter()
                    .find(|(t, _)| *t == typo)
                    .map(|(_, fix)| *fix)
                    .unwrap_or_default();
                out.push(Diagnostic::new(
                    Severity::Warning,
                    file,
                    Some(line_no),
                    format!("possible typo \\{} (did you mean \\{}?)", typo, fix),
                    TYPO_RULE,
                ));
            }
        }
    }
}

/// Rewrite every known command-name typo in `line` to its intended
/// command. Returns `None` when the line has none.
pub fn fix_typos(line: &str) -> Option<String> {
    let re = typo_pattern()?;
    let mut current = line.to_string();
    // A match consumes the character after the name, so back-to-back typos
    // take more than one pass. Every pass removes at least one typo.
    loop {
        let mut next = String::with_capacity(current.len());
        let mut last = 0;
        for caps in re.captures_iter(&current) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            let Some((_, fix)) = TYPOS.iter().find(|(typo, _)| *typo == name.as_str()) else {
                continue;
            };
            next.push_str(&current[last..name.start()]);
            next.push_str(fix);
            last = name.end();
        }
        if last == 0 {
            break;
        }
        next.push_str(&current[last..]);
        current = next;
    }
    (current != line).then_some(current)
}
