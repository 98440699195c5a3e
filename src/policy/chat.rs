//! Decision policy backed by an OpenAI-compatible chat-completions API.
//!
//! Each decision is one stateless request: the system prompt, the serialized
//! [`PolicyContext`] (which already carries the invocation history), and the
//! tool definitions. The model must answer with exactly one tool call.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::http::send_with_retry;
use super::types::{ChatMessage, ChatRequest, ChatResponse, FunctionDefinition, ToolDefinition};
use super::{DecisionPolicy, PolicyContext, PolicyDecision};
use crate::error::{RepairError, RepairResult};
use crate::tools::tool_specs;

const SYSTEM_PROMPT: &str = "You repair LaTeX source trees that fail to compile. \
Each turn you receive the current state as JSON: the file listing, validator diagnostics, \
the first compiler error with a log excerpt, and your previous tool calls with their results. \
Respond with exactly one tool call.\n\
Rules:\n\
- Line numbers refer to the file as it is now. Re-read lines after inserting or deleting.\n\
- Run fixEncoding on files that are not UTF-8 before editing their lines.\n\
- Make the smallest edit that fixes the reported problem; do not rewrite content.\n\
- Every edit is backed up; use restoreBackup to undo a bad edit.\n\
- Call compile to check your work, and fixComplete once the document should compile.";

pub struct ChatCompletionsPolicy {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

fn chat_endpoint(api_url: &str) -> Result<Url> {
    let base = if api_url.ends_with('/') {
        api_url.to_string()
    } else {
        format!("{}/", api_url)
    };
    Url::parse(&base)
        .with_context(|| format!("Invalid API URL: {}", api_url))?
        .join("chat/completions")
        .context("Failed to build chat completions URL")
}

fn build_request<'a>(model: &'a str, context: &PolicyContext) -> Result<ChatRequest<'a>> {
    let state = serde_json::to_string_pretty(context).context("Failed to serialize policy context")?;
    let tools = tool_specs()
        .into_iter()
        .map(|spec| ToolDefinition {
            kind: "function",
            function: FunctionDefinition {
                name: spec.name,
                description: spec.description,
                parameters: spec.parameters,
            },
        })
        .collect();

    Ok(ChatRequest {
        model,
        messages: vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", state),
        ],
        tools,
        tool_choice: "required",
        temperature: 0.0,
    })
}

/// Turn a response into a decision. A reply without a tool call becomes a
/// decision with an empty tool name, which the session records as an
/// invalid call instead of failing.
fn parse_response(response: ChatResponse) -> Result<PolicyDecision> {
    let Some(choice) = response.choices.into_iter().next() else {
        bail!("response contained no choices");
    };
    let message = choice.message;
    if message.tool_calls.len() > 1 {
        warn!(
            "Policy returned {} tool calls; using the first",
            message.tool_calls.len()
        );
    }

    match message.tool_calls.into_iter().next() {
        Some(call) => Ok(PolicyDecision {
            tool: call.function.name,
            arguments: Value::String(call.function.arguments),
            rationale: message.content.filter(|c| !c.trim().is_empty()),
        }),
        None => Ok(PolicyDecision {
            tool: String::new(),
            arguments: Value::Null,
            rationale: message.content,
        }),
    }
}

impl ChatCompletionsPolicy {
    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("texmend/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(api_url)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn request(&self, context: &PolicyContext) -> Result<PolicyDecision> {
        let body = build_request(&self.model, context)?;
        debug!("Requesting decision for step {} from {}", context.step, self.endpoint);

        let response = send_with_retry(|| {
            self.client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(500).collect();
            bail!("policy endpoint returned {}: {}", status, snippet);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;
        parse_response(parsed)
    }
}

#[async_trait]
impl DecisionPolicy for ChatCompletionsPolicy {
    async fn decide(&self, context: &PolicyContext) -> RepairResult<PolicyDecision> {
        self.request(context)
            .await
            .map_err(|e| RepairError::PolicyUnavailable(format!("{:#}", e)))
    }
}
