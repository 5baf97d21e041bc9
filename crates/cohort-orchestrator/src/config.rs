//! TOML configuration for the orchestrator and its seed agents.
//!
//! ```toml
//! [orchestrator]
//! tick_interval_ms = 5000
//! dispatch_mode = "immediate"
//!
//! [[agents]]
//! name = "ui-1"
//! role = "specialist"
//! capabilities = ["frontend"]
//! max_concurrent_tasks = 2
//! ```

use crate::registry::{DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_SPECIALIZATIONS};
use crate::types::AgentSpec;
use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// When a delegated task counts as running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// `delegated -> running` inside the same tick.
    #[default]
    Immediate,
    /// The task stays `delegated` until the agent acknowledges it.
    Acknowledged,
}

/// Built-in complexity classifier selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Regex keyword matching, see [`crate::classifier::KeywordClassifier`].
    #[default]
    Keyword,
    /// Description length thresholds.
    Length,
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Fallback dispatch interval. Submissions and completions also trigger a tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// When a delegated task counts as running.
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
    /// Buffer of the state-change broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Applied to agents registered without a limit.
    #[serde(default = "default_max_concurrent_tasks")]
    pub default_max_concurrent_tasks: u32,
    /// Capability tags that mark an agent as a specialist.
    #[serde(default = "default_specializations")]
    pub known_specializations: Vec<String>,
    /// Strategy for tasks submitted without an explicit priority.
    #[serde(default)]
    pub classifier: ClassifierKind,
}

fn default_tick_interval_ms() -> u64 {
    5_000
}
fn default_event_capacity() -> usize {
    256
}
fn default_max_concurrent_tasks() -> u32 {
    DEFAULT_MAX_CONCURRENT_TASKS
}
fn default_specializations() -> Vec<String> {
    DEFAULT_SPECIALIZATIONS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            dispatch_mode: DispatchMode::default(),
            event_capacity: default_event_capacity(),
            default_max_concurrent_tasks: default_max_concurrent_tasks(),
            known_specializations: default_specializations(),
            classifier: ClassifierKind::default(),
        }
    }
}

impl OrchestratorConfig {
    /// `tick_interval_ms` as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject zero intervals, capacities and limits.
    pub fn validate(&self) -> CohortResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(CohortError::Config(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CohortError::Config(
                "event_capacity must be greater than 0".into(),
            ));
        }
        if self.default_max_concurrent_tasks == 0 {
            return Err(CohortError::Config(
                "default_max_concurrent_tasks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Full configuration file: orchestrator settings plus agents to register at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortConfig {
    /// The `[orchestrator]` table.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// The `[[agents]]` array.
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

impl CohortConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CohortResult<Self> {
        let config: CohortConfig = toml::from_str(content)
            .map_err(|e| CohortError::Config(format!("Failed to parse config: {e}")))?;
        config.orchestrator.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file. Read failures surface as
    /// [`CohortError::Io`].
    pub fn load(path: &Path) -> CohortResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            CohortError::Config(msg) => {
                CohortError::Config(format!("{msg} (in '{}')", path.display()))
            }
            other => other,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRole, Priority};
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CohortConfig::from_toml_str("").unwrap();
        assert_eq!(config.orchestrator.tick_interval_ms, 5_000);
        assert_eq!(config.orchestrator.dispatch_mode, DispatchMode::Immediate);
        assert_eq!(config.orchestrator.default_max_concurrent_tasks, 3);
        assert_eq!(config.orchestrator.classifier, ClassifierKind::Keyword);
        assert!(config
            .orchestrator
            .known_specializations
            .contains(&"frontend".to_string()));
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = CohortConfig::from_toml_str(
            r#"
[orchestrator]
tick_interval_ms = 250
dispatch_mode = "acknowledged"
classifier = "length"

[[agents]]
name = "ui-1"
role = "specialist"
specializations = ["frontend"]
capabilities = ["frontend", "css"]
max_concurrent_tasks = 2
priority = "high"

[[agents]]
name = "generalist"
role = "worker"
"#,
        )
        .unwrap();
        let orchestrator = &config.orchestrator;
        assert_eq!(orchestrator.tick_interval(), Duration::from_millis(250));
        assert_eq!(orchestrator.dispatch_mode, DispatchMode::Acknowledged);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].role, AgentRole::Specialist);
        assert_eq!(config.agents[0].priority, Priority::High);
        assert_eq!(config.agents[0].max_concurrent_tasks, Some(2));
        assert_eq!(config.agents[1].max_concurrent_tasks, None);
    }

    #[test]
    fn test_unknown_role_is_config_error() {
        let err = CohortConfig::from_toml_str(
            r#"
[[agents]]
name = "x"
role = "wizard"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CohortError::Config(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err =
            CohortConfig::from_toml_str("[orchestrator]\ntick_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "[orchestrator]\nevent_capacity = 16").unwrap();
        let config = CohortConfig::load(tmp.path()).unwrap();
        assert_eq!(config.orchestrator.event_capacity, 16);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = CohortConfig::load(Path::new("/nonexistent/cohort.toml")).unwrap_err();
        assert!(matches!(err, CohortError::Io(_)));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_load_parse_error_names_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let content = "[orchestrator]\ntick_interval_ms = \"soon\"";
        writeln!(tmp.as_file_mut(), "{content}").unwrap();
        let err = CohortConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, CohortError::Config(_)));
        assert!(err.to_string().contains(&tmp.path().display().to_string()));
    }
}
