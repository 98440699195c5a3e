//! A policy that replays a fixed list of decisions.
//!
//! Used for dry runs (`repair --script`) and as the deterministic policy in
//! session tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{DecisionPolicy, PolicyContext, PolicyDecision};
use crate::error::{RepairError, RepairResult};

enum Script {
    Queue(VecDeque<PolicyDecision>),
    Repeat(PolicyDecision),
}

pub struct ScriptedPolicy {
    script: Mutex<Script>,
    seen: Mutex<Vec<PolicyContext>>,
}

impl ScriptedPolicy {
    /// Replay `decisions` in order, then fail as unavailable.
    pub fn new(decisions: Vec<PolicyDecision>) -> Self {
        Self::with_script(Script::Queue(decisions.into()))
    }

    /// Return `decision` on every step.
    pub fn repeating(decision: PolicyDecision) -> Self {
        Self::with_script(Script::Repeat(decision))
    }

    /// Parse a JSON array of `{"tool": .., "arguments": ..}` objects.
    pub fn from_json(text: &str) -> Result<Self> {
        let decisions: Vec<PolicyDecision> =
            serde_json::from_str(text).context("Failed to parse decision script")?;
        Ok(Self::new(decisions))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Contexts passed to [`DecisionPolicy::decide`] so far.
    pub fn contexts(&self) -> Vec<PolicyContext> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl DecisionPolicy for ScriptedPolicy {
    async fn decide(&self, context: &PolicyContext) -> RepairResult<PolicyDecision> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(context.clone());

        let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
        match &mut *script {
            Script::Repeat(decision) => Ok(decision.clone()),
            Script::Queue(queue) => queue.pop_front().ok_or_else(|| {
                RepairError::PolicyUnavailable("decision script exhausted".into())
            }),
        }
    }
}
