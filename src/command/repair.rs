use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RepairConfig;
use crate::policy::{ChatCompletionsPolicy, DecisionPolicy, ScriptedPolicy};
use crate::session::{JsonlErrorLog, RepairSession};

use super::open_executor;

pub struct RepairOptions {
    pub main: PathBuf,
    pub root: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub max_steps: Option<usize>,
    pub json: bool,
}

fn build_policy(config: &RepairConfig, opts: &RepairOptions) -> Result<Arc<dyn DecisionPolicy>> {
    if let Some(script) = &opts.script {
        let text = std::fs::read_to_string(script)
            .with_context(|| format!("Failed to read script: {}", script.display()))?;
        info!("Replaying decisions from {}", script.display());
        return Ok(Arc::new(ScriptedPolicy::from_json(&text)?));
    }

    let Some(api_key) = opts.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        bail!("No API key. Set TEXMEND_API_KEY, pass --api-key, or use --script");
    };
    let api_url = opts.api_url.as_deref().unwrap_or(&config.api_url);
    let model = opts.model.as_deref().unwrap_or(&config.model);
    info!("Using model {} at {}", model, api_url);
    Ok(Arc::new(ChatCompletionsPolicy::new(
        api_url,
        api_key,
        model,
        Duration::from_secs(config.policy_timeout_secs),
    )?))
}

/// Compile the document and run a repair session if the build fails.
/// Returns whether the document compiles at the end.
pub async fn run_repair(mut config: RepairConfig, opts: RepairOptions) -> Result<bool> {
    if let Some(max_steps) = opts.max_steps {
        config.max_steps = max_steps;
        config.validate()?;
    }

    let executor = open_executor(&config, opts.root.as_deref(), &opts.main)?;
    println!(
        "Compiling {} with {}...",
        executor.main_file(),
        config.compiler
    );
    let initial = executor.compile().await?;
    if initial.success {
        println!("✅ {} already compiles; nothing to repair.", executor.main_file());
        return Ok(true);
    }
    if let Some(err) = initial.first_error() {
        println!("Build failed: {}", err.message);
    }

    let policy = build_policy(&config, &opts)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current step");
            on_signal.cancel();
        }
    });

    let session = RepairSession::new(
        executor,
        policy,
        config.session_config(),
        initial.log,
        cancel,
    )
    .with_error_sink(Arc::new(JsonlErrorLog::new(config.error_log()?)), 0);

    let report = session.run().await;
    if opts.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report.render());
    }

    if report.is_repaired() {
        println!("✅ Repaired in {} step(s).", report.steps);
    } else {
        println!(
            "❌ Repair stopped ({}). Restore originals with 'texmend backups restore --original <file>'.",
            report.outcome
        );
    }
    Ok(report.is_repaired())
}
