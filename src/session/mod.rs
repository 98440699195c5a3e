//! The repair session controller.
//!
//! A session is a bounded loop: build the context, ask the policy for one
//! tool call, execute it, validate whatever it changed, and repeat until a
//! compile succeeds or a termination rule fires. Exactly one tool runs per
//! step, and every call, accepted or rejected, is logged before the loop
//! moves on.

mod report;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compiler::{first_error, log_excerpt};
use crate::error::RepairError;
use crate::policy::{DecisionPolicy, PolicyContext, PolicyDecision};
use crate::tools::{ToolCall, ToolExecutor};
use crate::validator::Diagnostic;

pub use report::{
    ErrorRecord, ErrorSink, JsonlErrorLog, SessionReport, TerminationKind, ToolInvocation,
};

/// Tool name recorded when the policy itself fails to produce a decision.
const POLICY_STEP: &str = "policy";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_steps: usize,
    /// Consecutive steps without a file change or a drop in the diagnostic
    /// count after which the session gives up.
    pub no_progress_limit: usize,
    pub policy_timeout: Duration,
    /// How many recent invocations the policy sees.
    pub history_window: usize,
    pub log_excerpt_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            no_progress_limit: 4,
            policy_timeout: Duration::from_secs(300),
            history_window: 12,
            log_excerpt_chars: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingDecision,
    ExecutingTool,
    Validating,
    Compiling,
    Repaired,
    Terminated(TerminationKind),
}

enum Step {
    Continue { changed: bool },
    Repaired,
    Fatal(String),
}

enum DecisionFailure {
    Cancelled,
    Failed(RepairError),
}

pub struct RepairSession {
    id: String,
    executor: ToolExecutor,
    policy: Arc<dyn DecisionPolicy>,
    config: SessionConfig,
    cancel: CancellationToken,
    error_sink: Option<(Arc<dyn ErrorSink>, u32)>,
    state: SessionState,
    step: usize,
    invocations: Vec<ToolInvocation>,
    touched: BTreeSet<String>,
    last_log: String,
}

impl RepairSession {
    /// Start a session for a tree whose last compile produced `initial_log`.
    pub fn new(
        executor: ToolExecutor,
        policy: Arc<dyn DecisionPolicy>,
        config: SessionConfig,
        initial_log: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            executor,
            policy,
            config,
            cancel,
            error_sink: None,
            state: SessionState::Idle,
            step: 0,
            invocations: Vec::new(),
            touched: BTreeSet::new(),
            last_log: initial_log,
        }
    }

    /// Report terminal failures to `sink`, tagged with `retry_count`.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>, retry_count: u32) -> Self {
        self.error_sink = Some((sink, retry_count));
        self
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
            self.state = next;
        }
    }

    pub async fn run(mut self) -> SessionReport {
        let started_at = Utc::now();
        info!(
            "Starting repair session {} for {} (max {} steps)",
            self.id,
            self.executor.main_file(),
            self.config.max_steps
        );

        let mut best = usize::MAX;
        let mut stale = 0usize;
        let mut last_changed = false;

        let (outcome, reason) = loop {
            if self.cancel.is_cancelled() {
                break (
                    TerminationKind::Cancelled,
                    format!("cancelled before step {}", self.step + 1),
                );
            }
            self.transition(SessionState::AwaitingDecision);

            let diagnostics = self.open_diagnostics();
            if self.step > 0 {
                if last_changed || diagnostics.len() < best {
                    stale = 0;
                } else {
                    stale += 1;
                }
            }
            best = best.min(diagnostics.len());

            if stale >= self.config.no_progress_limit {
                break (
                    TerminationKind::NoProgress,
                    format!(
                        "{} consecutive step(s) changed no file and did not reduce {} diagnostic(s)",
                        stale,
                        diagnostics.len()
                    ),
                );
            }
            if self.step >= self.config.max_steps {
                break (
                    TerminationKind::BudgetExhausted,
                    format!("step budget of {} exhausted", self.config.max_steps),
                );
            }

            let context = self.context(diagnostics);
            let started = (Utc::now(), Instant::now());
            let decision = match self.decide(&context).await {
                Ok(decision) => decision,
                Err(DecisionFailure::Cancelled) => {
                    break (
                        TerminationKind::Cancelled,
                        format!("cancelled while awaiting decision {}", self.step + 1),
                    );
                }
                Err(DecisionFailure::Failed(err)) => {
                    let reason = err.to_string();
                    self.step += 1;
                    self.record(POLICY_STEP.to_string(), Value::Null, started, Err(err));
                    break (TerminationKind::FatalToolError, reason);
                }
            };

            self.step += 1;
            match self.execute_decision(decision, started).await {
                Step::Continue { changed } => last_changed = changed,
                Step::Repaired => {
                    break (
                        TerminationKind::Repaired,
                        format!("compilation succeeded at step {}", self.step),
                    );
                }
                Step::Fatal(reason) => break (TerminationKind::FatalToolError, reason),
            }
        };

        self.finish(outcome, reason, started_at)
    }

    async fn decide(&self, context: &PolicyContext) -> Result<PolicyDecision, DecisionFailure> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DecisionFailure::Cancelled),
            result = tokio::time::timeout(self.config.policy_timeout, self.policy.decide(context)) => {
                match result {
                    Ok(decision) => decision.map_err(DecisionFailure::Failed),
                    Err(_) => Err(DecisionFailure::Failed(RepairError::PolicyUnavailable(format!(
                        "no decision within {}s",
                        self.config.policy_timeout.as_secs()
                    )))),
                }
            }
        }
    }

    async fn execute_decision(
        &mut self,
        decision: PolicyDecision,
        started: (DateTime<Utc>, Instant),
    ) -> Step {
        if let Some(rationale) = &decision.rationale {
            debug!("Policy rationale: {}", rationale);
        }

        let call = match ToolCall::parse(&decision.tool, &decision.arguments) {
            Ok(call) => call,
            Err(err) => {
                warn!("Rejected tool call '{}': {}", decision.tool, err);
                self.record(decision.tool, decision.arguments, started, Err(err));
                return Step::Continue { changed: false };
            }
        };
        let arguments = serde_json::to_value(&call)
            .ok()
            .and_then(|v| v.get("args").cloned())
            .unwrap_or(decision.arguments);
        let tool = call.name().to_string();

        if call.compiles() {
            let blocking = self.touched_errors();
            if !blocking.is_empty() {
                let mut message = format!(
                    "compile refused: {} error(s) remain in modified files",
                    blocking.len()
                );
                for diag in &blocking {
                    message.push_str(&format!("\n{}", diag));
                }
                info!("Refusing {}: modified files still have errors", tool);
                self.record(tool, arguments, started, Err(RepairError::InvalidArgument(message)));
                return Step::Continue { changed: false };
            }
            self.transition(SessionState::Compiling);
        } else {
            self.transition(SessionState::ExecutingTool);
        }

        match self.executor.execute(&call).await {
            Ok(output) => {
                let mut text = output.text;
                let changed = !output.changed.is_empty();
                if changed {
                    self.transition(SessionState::Validating);
                    self.touched.extend(output.changed.iter().cloned());
                    text.push('\n');
                    text.push_str(&self.validate_changed(&output.changed));
                }

                let repaired = match output.compile {
                    Some(compile) => {
                        let success = compile.success;
                        self.last_log = compile.log;
                        success
                    }
                    None => false,
                };
                info!("Step {}: {} ok", self.step, tool);
                self.record(tool, arguments, started, Ok(text));
                if repaired {
                    Step::Repaired
                } else {
                    Step::Continue { changed }
                }
            }
            Err(err) => {
                let fatal = err.is_fatal();
                let reason = err.to_string();
                warn!("Step {}: {} failed: {}", self.step, tool, reason);
                self.record(tool, arguments, started, Err(err));
                if fatal {
                    Step::Fatal(reason)
                } else {
                    Step::Continue { changed: false }
                }
            }
        }
    }

    fn record(
        &mut self,
        tool: String,
        arguments: Value,
        started: (DateTime<Utc>, Instant),
        result: Result<String, RepairError>,
    ) {
        let (ok, outcome, error_kind) = match result {
            Ok(text) => (true, text, None),
            Err(err) => (false, err.to_string(), Some(err.kind())),
        };
        self.invocations.push(ToolInvocation {
            seq: self.invocations.len() + 1,
            tool,
            arguments,
            ok,
            outcome,
            error_kind,
            started_at: started.0,
            duration_ms: started.1.elapsed().as_millis() as u64,
        });
    }

    /// Diagnostics over every `.tex` file, recomputed from disk.
    fn open_diagnostics(&self) -> Vec<Diagnostic> {
        let mut all = Vec::new();
        for file in self.executor.list_files() {
            if !file.ends_with(".tex") {
                continue;
            }
            match self.executor.diagnostics_for(&file) {
                Ok(diagnostics) => all.extend(diagnostics),
                Err(e) => debug!("Skipping diagnostics for {}: {}", file, e),
            }
        }
        all
    }

    fn touched_errors(&self) -> Vec<Diagnostic> {
        self.touched
            .iter()
            .filter_map(|file| self.executor.diagnostics_for(file).ok())
            .flatten()
            .filter(Diagnostic::is_error)
            .collect()
    }

    fn validate_changed(&self, files: &[String]) -> String {
        let mut lines = Vec::new();
        for file in files {
            match self.executor.diagnostics_for(file) {
                Ok(diagnostics) => {
                    let errors: Vec<&Diagnostic> =
                        diagnostics.iter().filter(|d| d.is_error()).collect();
                    if errors.is_empty() {
                        lines.push(format!("Validation: {} has no structural errors", file));
                    } else {
                        lines.push(format!(
                            "Validation: {} error(s) remain in {}",
                            errors.len(),
                            file
                        ));
                        lines.extend(errors.iter().map(|d| format!("  {}", d)));
                    }
                }
                Err(e) => lines.push(format!("Validation: could not check {}: {}", file, e)),
            }
        }
        lines.join("\n")
    }

    fn context(&self, diagnostics: Vec<Diagnostic>) -> PolicyContext {
        let skip = self
            .invocations
            .len()
            .saturating_sub(self.config.history_window);
        PolicyContext {
            session_id: self.id.clone(),
            step: self.step + 1,
            max_steps: self.config.max_steps,
            main_file: self.executor.main_file().to_string(),
            files: self.executor.list_files(),
            diagnostics,
            compile_error: first_error(&self.last_log),
            log_excerpt: log_excerpt(&self.last_log, self.config.log_excerpt_chars),
            history: self.invocations[skip..]
                .iter()
                .map(ToolInvocation::summary)
                .collect(),
        }
    }

    fn finish(
        mut self,
        outcome: TerminationKind,
        reason: String,
        started_at: DateTime<Utc>,
    ) -> SessionReport {
        if outcome == TerminationKind::Repaired {
            self.transition(SessionState::Repaired);
            info!("Session {} repaired {} in {} step(s)", self.id, self.executor.main_file(), self.step);
        } else {
            self.transition(SessionState::Terminated(outcome));
            warn!("Session {} ended {}: {}", self.id, outcome, reason);
        }

        let report = SessionReport {
            session_id: self.id.clone(),
            source_root: self.executor.tree().root().to_path_buf(),
            main_file: self.executor.main_file().to_string(),
            outcome,
            reason,
            steps: self.step,
            final_diagnostics: self.open_diagnostics(),
            invocations: std::mem::take(&mut self.invocations),
            touched_files: self.touched.iter().cloned().collect(),
            started_at,
            finished_at: Utc::now(),
        };

        if !report.is_repaired() {
            if let Some((sink, retry_count)) = &self.error_sink {
                if let Err(e) = sink.report(&ErrorRecord::from_report(&report, *retry_count)) {
                    warn!("Failed to record session failure: {:#}", e);
                }
            }
        }
        report
    }
}
