//! Analyzer configuration
//!
//! Values come from, lowest priority first: built-in defaults, an optional
//! `rpctrace.toml`, then the environment. CLI flags are applied last by the
//! binary.
//!
//! # Example rpctrace.toml
//!
//! ```toml
//! verbose_state_transitions = true
//! verbose_log = false
//! pid_index = 0
//! fs_op_marker = "src/ioc/ops"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::selector::DEFAULT_FS_OP_MARKER;

/// Include SUCCESS rows in transition tables
pub const ENV_VERBOSE_STATE_TRANSITIONS: &str = "VERBOSE_STATE_TRANSITIONS";
/// Include lines outside the traced hierarchy in transcripts
pub const ENV_VERBOSE_LOG: &str = "VERBOSE_LOG";
/// Which pid of a multiprocess log to analyse
pub const ENV_PID_INDEX: &str = "RPCTRACE_PID_INDEX";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Report SUCCESS transitions as well as findings
    pub verbose_state_transitions: bool,

    /// Keep unmarked lines in the transcript
    pub verbose_log: bool,

    /// Index into the sorted pid list; required for multiprocess logs
    pub pid_index: Option<usize>,

    /// Source path fragment identifying filesystem operation handlers
    #[serde(default = "default_fs_op_marker")]
    pub fs_op_marker: String,
}

fn default_fs_op_marker() -> String {
    DEFAULT_FS_OP_MARKER.to_string()
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            verbose_state_transitions: false,
            verbose_log: true,
            pid_index: None,
            fs_op_marker: default_fs_op_marker(),
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_VERBOSE_STATE_TRANSITIONS) {
            self.verbose_state_transitions = parse_bool(ENV_VERBOSE_STATE_TRANSITIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_VERBOSE_LOG) {
            self.verbose_log = parse_bool(ENV_VERBOSE_LOG, &value)?;
        }
        if let Some(value) = lookup(ENV_PID_INDEX) {
            let index = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_PID_INDEX, value))?;
            self.pid_index = Some(index);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fs_op_marker.trim().is_empty() {
            bail!("fs_op_marker must not be empty");
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("Invalid boolean for {}: {}", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AnalyzerConfig::default();
        assert!(!config.verbose_state_transitions);
        assert!(config.verbose_log);
        assert_eq!(config.pid_index, None);
        assert_eq!(config.fs_op_marker, "src/ioc/ops");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalyzerConfig::from_toml_str("verbose_log = false\npid_index = 2").unwrap();
        assert!(!config.verbose_log);
        assert_eq!(config.pid_index, Some(2));
        assert_eq!(config.fs_op_marker, "src/ioc/ops");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(AnalyzerConfig::from_toml_str("verbose_log = ").is_err());
        assert!(AnalyzerConfig::from_toml_str("verbose_log = 3").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = AnalyzerConfig::default()
            .with_env_from(env(&[
                ("VERBOSE_STATE_TRANSITIONS", "yes"),
                ("VERBOSE_LOG", "0"),
                ("RPCTRACE_PID_INDEX", "1"),
            ]))
            .unwrap();
        assert!(config.verbose_state_transitions);
        assert!(!config.verbose_log);
        assert_eq!(config.pid_index, Some(1));
    }

    #[test]
    fn test_env_rejects_garbage() {
        assert!(AnalyzerConfig::default()
            .with_env_from(env(&[("VERBOSE_LOG", "maybe")]))
            .is_err());
        assert!(AnalyzerConfig::default()
            .with_env_from(env(&[("RPCTRACE_PID_INDEX", "-1")]))
            .is_err());
    }

    #[test]
    #[serial]
    fn test_process_env() {
        std::env::set_var(ENV_VERBOSE_STATE_TRANSITIONS, "true");
        let config = AnalyzerConfig::default().with_env();
        std::env::remove_var(ENV_VERBOSE_STATE_TRANSITIONS);
        assert!(config.unwrap().verbose_state_transitions);
    }

    #[test]
    fn test_validate_rejects_empty_marker() {
        let config = AnalyzerConfig {
            fs_op_marker: "  ".to_string(),
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpctrace.toml");
        std::fs::write(&path, "verbose_state_transitions = true\n").unwrap();
        let config = AnalyzerConfig::from_file(&path).unwrap();
        assert!(config.verbose_state_transitions);
        assert!(AnalyzerConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
