//! Declarative daemon configuration: agents, complexity routing,
//! concurrency caps, and feature flags (spec.md §3 "Config", §6
//! "Config file").
//!
//! Loaded at boot from `.fuel/config.yaml` and layered with environment
//! overrides; hot-reloadable on the `ReloadConfig` IPC command without
//! dropping running processes.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn default_max_concurrent() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_task_review() -> bool {
    true
}

fn default_client_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_task_timeout_seconds() -> u64 {
    3600
}

/// One logical agent: a driver plus the concrete model/args/env it runs
/// with, and its own concurrency cap (spec.md §6 `agents`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub driver: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

/// Complexity -> logical agent name routing table (spec.md §4.6 Work
/// variant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplexityRouting {
    pub trivial: Option<String>,
    pub simple: Option<String>,
    pub moderate: Option<String>,
    pub complex: Option<String>,
}

impl ComplexityRouting {
    pub fn agent_for(&self, complexity: fuel_common::Complexity) -> Option<&str> {
        match complexity {
            fuel_common::Complexity::Trivial => self.trivial.as_deref(),
            fuel_common::Complexity::Simple => self.simple.as_deref(),
            fuel_common::Complexity::Moderate => self.moderate.as_deref(),
            fuel_common::Complexity::Complex => self.complex.as_deref(),
        }
    }
}

/// The full shape of `.fuel/config.yaml` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub primary: String,
    #[serde(default)]
    pub complexity: ComplexityRouting,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub reality: Option<String>,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub epic_mirrors: bool,
    #[serde(default = "default_task_review")]
    pub task_review: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_client_buffer_bytes")]
    pub client_buffer_bytes: usize,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    /// DESIGN.md Open Question resolution: whether an `auto-closed` task
    /// may be sent through review again after a human manually reopens it.
    #[serde(default)]
    pub reviewable_after_manual_reopen: bool,
}

impl Config {
    /// Parse from a YAML string (used by both file loading and tests).
    pub fn parse(content: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Load from `path`, applying `FUEL_LOG_LEVEL`-adjacent environment
    /// overrides that do not belong in the file (none currently defined
    /// beyond what `context::Context` resolves independently).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Validate that every agent name referenced by `primary`, `review`,
    /// `reality`, and the complexity table is actually declared in
    /// `agents`. Called once at boot and again before accepting a
    /// `ReloadConfig` command (spec.md §7 ConfigError).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.require_agent(&self.primary)?;
        if let Some(agent) = &self.review {
            self.require_agent(agent)?;
        }
        if let Some(agent) = &self.reality {
            self.require_agent(agent)?;
        }
        for agent in [
            &self.complexity.trivial,
            &self.complexity.simple,
            &self.complexity.moderate,
            &self.complexity.complex,
        ]
        .into_iter()
        .flatten()
        {
            self.require_agent(agent)?;
        }
        Ok(())
    }

    fn require_agent(&self, name: &str) -> Result<(), ConfigError> {
        if self.agents.contains_key(name) {
            Ok(())
        } else {
            Err(ConfigError::UnknownAgent { agent: name.to_string() })
        }
    }

    /// Resolve the logical agent name for a given complexity, falling
    /// back to `primary` when the routing table leaves it unset
    /// (spec.md §4.6 Work variant).
    pub fn agent_for_complexity(&self, complexity: fuel_common::Complexity) -> &str {
        self.complexity.agent_for(complexity).unwrap_or(&self.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
primary: sonnet
review: reviewer
complexity:
  trivial: haiku
  complex: opus
agents:
  sonnet:
    driver: claude
    model: claude-sonnet-4
    max_concurrent: 3
  haiku:
    driver: claude
    model: claude-haiku
  opus:
    driver: claude
    model: claude-opus-4
  reviewer:
    driver: claude
    model: claude-sonnet-4
epic_mirrors: true
"#
    }

    #[test]
    fn parses_full_config() {
        let config = Config::parse(sample_yaml(), "test.yaml").unwrap();
        assert_eq!(config.primary, "sonnet");
        assert_eq!(config.review.as_deref(), Some("reviewer"));
        assert!(config.epic_mirrors);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.agents["sonnet"].max_concurrent, 3);
        assert_eq!(config.agents["haiku"].max_concurrent, 2);
    }

    #[test]
    fn validate_rejects_unknown_agent_reference() {
        let yaml = r#"
primary: ghost
agents: {}
"#;
        let config = Config::parse(yaml, "test.yaml").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAgent { agent } if agent == "ghost"));
    }

    #[test]
    fn agent_for_complexity_falls_back_to_primary() {
        let config = Config::parse(sample_yaml(), "test.yaml").unwrap();
        assert_eq!(
            config.agent_for_complexity(fuel_common::Complexity::Trivial),
            "haiku"
        );
        assert_eq!(
            config.agent_for_complexity(fuel_common::Complexity::Simple),
            "sonnet"
        );
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = Config::parse("not: [valid", "test.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
