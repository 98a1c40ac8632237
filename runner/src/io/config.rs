//! Runner configuration stored as TOML (`runner.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::DeliveryState;

/// Runner configuration (TOML).
///
/// Edited by humans next to a delivery. Missing fields default to the values
/// a standard delivery uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Enforce `allowSkipping` from item session control.
    pub enable_allow_skipping: bool,

    /// Enforce `validateResponses` from item session control.
    pub enable_validate_responses: bool,

    /// Report feedback as shown even when item session control disables it.
    pub force_display_feedback: bool,

    /// Keep tool states in the key-value store.
    pub tool_state_server_storage: bool,

    /// Tools whose state is always reported, stored or not.
    pub tools: Vec<String>,

    /// Fallback language for compiled item data.
    pub default_language: String,

    /// Delivery state recorded when the candidate exits early.
    pub state_after_exit: DeliveryState,

    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// A partially answered item counts as answered.
    pub partially_answered_is_answered: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            partially_answered_is_answered: true,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enable_allow_skipping: true,
            enable_validate_responses: true,
            force_display_feedback: false,
            tool_state_server_storage: true,
            tools: Vec::new(),
            default_language: "en-US".to_string(),
            state_after_exit: DeliveryState::Finished,
            review: ReviewConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_language.trim().is_empty() {
            return Err(anyhow!("default_language must be non-empty"));
        }
        if self.state_after_exit == DeliveryState::Active {
            return Err(anyhow!("state_after_exit must end the delivery"));
        }
        if self.tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(anyhow!("tools must not contain empty ids"));
        }
        Ok(())
    }

    /// Completion judgment mode used by context and map views.
    pub fn partial_completion(&self) -> bool {
        self.review.partially_answered_is_answered
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
        assert!(cfg.partial_completion());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runner.toml");
        let cfg = RunnerConfig {
            tools: vec!["calculator".to_string()],
            state_after_exit: DeliveryState::Terminated,
            ..RunnerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runner.toml");
        fs::write(&path, "[review]\npartially_answered_is_answered = false\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(!cfg.partial_completion());
        assert_eq!(cfg.default_language, "en-US");
    }

    #[test]
    fn active_exit_state_is_rejected() {
        let cfg = RunnerConfig {
            state_after_exit: DeliveryState::Active,
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
