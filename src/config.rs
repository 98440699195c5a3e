//! User configuration, stored in `~/.texmend/config.json`.
//!
//! Every field is optional in the file; missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoding::DEFAULT_GBK_PAIR_THRESHOLD;
use crate::session::SessionConfig;
use crate::tools::ExecutorOptions;

const CONFIG_DIR: &str = ".texmend";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepairConfig {
    pub max_steps: usize,
    pub no_progress_limit: usize,
    pub policy_timeout_secs: u64,
    pub compile_timeout_secs: u64,
    pub gbk_pair_threshold: f64,
    pub history_window: usize,
    pub read_limit_bytes: usize,
    pub log_excerpt_chars: usize,
    pub compiler: String,
    pub compiler_args: Vec<String>,
    /// Defaults to `~/.texmend/backups`.
    pub backup_dir: Option<PathBuf>,
    pub api_url: String,
    pub model: String,
    /// Defaults to `~/.texmend/errors.jsonl`.
    pub error_log: Option<PathBuf>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            no_progress_limit: 4,
            policy_timeout_secs: 300,
            compile_timeout_secs: 300,
            gbk_pair_threshold: DEFAULT_GBK_PAIR_THRESHOLD,
            history_window: 12,
            read_limit_bytes: 30_000,
            log_excerpt_chars: 3_000,
            compiler: "xelatex".to_string(),
            compiler_args: vec![
                "-interaction=nonstopmode".to_string(),
                "-file-line-error".to_string(),
            ],
            backup_dir: None,
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            error_log: None,
        }
    }
}

/// `~/.texmend`
pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(CONFIG_DIR))
}

impl RepairConfig {
    /// Load `explicit` if given (it must exist), otherwise the default config
    /// file if present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = config_dir()?.join(CONFIG_FILE);
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    debug!("No config at {:?}; using defaults", path);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            bail!("maxSteps must be at least 1");
        }
        if self.no_progress_limit == 0 {
            bail!("noProgressLimit must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.gbk_pair_threshold) {
            bail!(
                "gbkPairThreshold must be between 0 and 1, got {}",
                self.gbk_pair_threshold
            );
        }
        if self.compiler.trim().is_empty() {
            bail!("compiler must not be empty");
        }
        Ok(())
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        match &self.backup_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("backups")),
        }
    }

    pub fn error_log(&self) -> Result<PathBuf> {
        match &self.error_log {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("errors.jsonl")),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_steps: self.max_steps,
            no_progress_limit: self.no_progress_limit,
            policy_timeout: Duration::from_secs(self.policy_timeout_secs),
            history_window: self.history_window,
            log_excerpt_chars: self.log_excerpt_chars,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            gbk_threshold: self.gbk_pair_threshold,
            read_limit_bytes: self.read_limit_bytes,
            compile_timeout: Duration::from_secs(self.compile_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RepairConfig::default();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.no_progress_limit, 4);
        assert_eq!(config.compiler, "xelatex");
        assert!(config.compiler_args.contains(&"-file-line-error".to_string()));
        assert_eq!(config.session_config().policy_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"maxSteps": 8, "compiler": "pdflatex", "backupDir": "/var/tmp/tm"}"#,
        )
        .unwrap();

        let config = RepairConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.max_steps, 8);
        assert_eq!(config.compiler, "pdflatex");
        assert_eq!(config.backup_dir().unwrap(), PathBuf::from("/var/tmp/tm"));
        assert_eq!(config.no_progress_limit, 4);
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gbkPairThreshold": 1.5}"#).unwrap();
        let err = RepairConfig::load(Some(path.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("gbkPairThreshold"));

        std::fs::write(&path, r#"{"maxSteps": 0}"#).unwrap();
        assert!(RepairConfig::load(Some(path.as_path())).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(RepairConfig::load(Some(dir.path().join("nope.json").as_path())).is_err());
    }
}
