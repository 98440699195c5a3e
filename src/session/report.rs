//! Invocation log entries, terminal reports and the error-record sink.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::policy::InvocationSummary;
use crate::validator::Diagnostic;

/// How much of an outcome text is handed back to the policy in history.
const SUMMARY_OUTCOME_CHARS: usize = 600;

/// One executed (or rejected) tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub seq: usize,
    pub tool: String,
    pub arguments: Value,
    pub ok: bool,
    /// Tool output on success, failure reason otherwise.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn summary(&self) -> InvocationSummary {
        let mut outcome: String = self.outcome.chars().take(SUMMARY_OUTCOME_CHARS).collect();
        if outcome.len() < self.outcome.len() {
            outcome.push_str(" ...");
        }
        InvocationSummary {
            seq: self.seq,
            tool: self.tool.clone(),
            arguments: self.arguments.clone(),
            ok: self.ok,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationKind {
    Repaired,
    BudgetExhausted,
    NoProgress,
    FatalToolError,
    Cancelled,
}

impl TerminationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationKind::Repaired => "repaired",
            TerminationKind::BudgetExhausted => "budget-exhausted",
            TerminationKind::NoProgress => "no-progress",
            TerminationKind::FatalToolError => "fatal-tool-error",
            TerminationKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub source_root: PathBuf,
    pub main_file: String,
    pub outcome: TerminationKind,
    pub reason: String,
    pub steps: usize,
    pub invocations: Vec<ToolInvocation>,
    pub touched_files: Vec<String>,
    pub final_diagnostics: Vec<Diagnostic>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn is_repaired(&self) -> bool {
        self.outcome == TerminationKind::Repaired
    }

    /// Human-readable report: outcome, every invocation, then what is left.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let elapsed = self.finished_at - self.started_at;
        let _ = writeln!(
            out,
            "Session {} on {}: {} after {} step(s) in {:.1}s",
            self.session_id,
            self.main_file,
            self.outcome,
            self.steps,
            elapsed.num_milliseconds() as f64 / 1000.0
        );
        let _ = writeln!(out, "Reason: {}", self.reason);

        if !self.invocations.is_empty() {
            let _ = writeln!(out, "\nInvocations:");
            for inv in &self.invocations {
                let status = if inv.ok { "ok" } else { "failed" };
                let first_line = inv.outcome.lines().next().unwrap_or("");
                let _ = writeln!(
                    out,
                    "  #{:<3} {} {} [{}] {}",
                    inv.seq, inv.tool, inv.arguments, status, first_line
                );
            }
        }

        if !self.touched_files.is_empty() {
            let _ = writeln!(out, "\nModified files: {}", self.touched_files.join(", "));
        }

        let errors = self.final_diagnostics.iter().filter(|d| d.is_error()).count();
        if errors > 0 {
            let _ = writeln!(out, "\nRemaining errors:");
            for diag in self.final_diagnostics.iter().filter(|d| d.is_error()) {
                let _ = writeln!(out, "  {}", diag);
            }
        }
        out
    }
}

/// A terminal failure, as handed to an external error-record store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: String,
    pub stage: String,
    pub message: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    pub session_ref: String,
}

impl ErrorRecord {
    pub fn from_report(report: &SessionReport, retry_count: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage: report.outcome.as_str().to_string(),
            message: report.reason.clone(),
            retry_count,
            timestamp: report.finished_at,
            session_ref: report.session_id.clone(),
        }
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, record: &ErrorRecord) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlErrorLog {
    path: PathBuf,
}

impl JsonlErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ErrorSink for JsonlErrorLog {
    fn report(&self, record: &ErrorRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let mut line = serde_json::to_string(record).context("Failed to serialize error record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log: {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write error log: {:?}", self.path))?;
        debug!("Recorded {} failure for session {}", record.stage, record.session_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report(outcome: TerminationKind) -> SessionReport {
        let now = Utc::now();
        SessionReport {
            session_id: "abc".into(),
            source_root: PathBuf::from("/tmp/doc"),
            main_file: "main.tex".into(),
            outcome,
            reason: "no change in 4 steps".into(),
            steps: 6,
            invocations: vec![ToolInvocation {
                seq: 1,
                tool: "deleteLine".into(),
                arguments: serde_json::json!({"file": "main.tex", "line": 3}),
                ok: false,
                outcome: "line 30 is out of range for main.tex (10 lines)\nmore".into(),
                error_kind: Some("OutOfRange"),
                started_at: now,
                duration_ms: 2,
            }],
            touched_files: Vec::new(),
            final_diagnostics: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_termination_kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(TerminationKind::BudgetExhausted).unwrap(),
            "budget-exhausted"
        );
        assert_eq!(TerminationKind::FatalToolError.to_string(), "fatal-tool-error");
    }

    #[test]
    fn test_render_lists_invocations() {
        let text = report(TerminationKind::NoProgress).render();
        assert!(text.contains("no-progress after 6 step(s)"));
        assert!(text.contains("deleteLine"));
        assert!(text.contains("[failed] line 30 is out of range"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn test_summary_truncates_long_outcomes() {
        let mut inv = report(TerminationKind::NoProgress).invocations.remove(0);
        inv.outcome = "x".repeat(SUMMARY_OUTCOME_CHARS + 10);
        let summary = inv.summary();
        assert!(summary.outcome.ends_with(" ..."));
        assert_eq!(summary.outcome.len(), SUMMARY_OUTCOME_CHARS + 4);
    }

    #[test]
    fn test_jsonl_error_log_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/errors.jsonl");
        let log = JsonlErrorLog::new(&path);
        let report = report(TerminationKind::BudgetExhausted);

        log.report(&ErrorRecord::from_report(&report, 0)).unwrap();
        log.report(&ErrorRecord::from_report(&report, 1)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "budget-exhausted");
        assert_eq!(lines[1]["retryCount"], 1);
        assert_eq!(lines[1]["sessionRef"], "abc");
    }
}
