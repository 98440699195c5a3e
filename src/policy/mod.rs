//! Decision policies: given the session state, choose the next tool call.
//!
//! The session owns all state; a policy sees one [`PolicyContext`] per step
//! and answers with one [`PolicyDecision`]. Decisions are untrusted and are
//! parsed into a [`crate::tools::ToolCall`] by the session.

mod chat;
mod http;
mod scripted;
mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::CompileError;
use crate::error::RepairResult;
use crate::validator::Diagnostic;

pub use chat::ChatCompletionsPolicy;
pub use scripted::ScriptedPolicy;

/// One past tool call as the policy sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
    pub seq: usize,
    pub tool: String,
    pub arguments: Value,
    pub ok: bool,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContext {
    pub session_id: String,
    pub step: usize,
    pub max_steps: usize,
    pub main_file: String,
    pub files: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub compile_error: Option<CompileError>,
    pub log_excerpt: String,
    /// Most recent invocations, oldest first.
    pub history: Vec<InvocationSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub tool: String,
    #[serde(default, alias = "args")]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl PolicyDecision {
    pub fn new(tool: &str, arguments: Value) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
            rationale: None,
        }
    }
}

/// Chooses the next tool call. An `Err` ends the session; an unusable
/// decision should be returned as is and left to the session to reject.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    async fn decide(&self, context: &PolicyContext) -> RepairResult<PolicyDecision>;
}
