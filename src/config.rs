//! Engine configuration.
//!
//! Defaults match observed production behaviour. A YAML file can override
//! any subset of fields, and a handful of `ISMS_*` environment variables
//! override the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration for the command engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub resolver: ResolverConfig,
    pub executor: ExecutorConfig,
    pub shadow: ShadowConfig,
}

/// Intent router thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum confidence for the pattern/model classifier to report an intent.
    pub classifier_threshold: f32,

    /// Minimum classifier confidence for the layered router to act on it.
    pub classifier_override_threshold: f32,

    /// Maximum memoized classifications.
    pub classifier_cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier_threshold: 0.7,
            classifier_override_threshold: 0.6,
            classifier_cache_capacity: 256,
        }
    }
}

/// Entity resolution parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Token-set overlap, as a fraction of the smaller set, for the weakest
    /// name-match tier.
    pub token_overlap_threshold: f32,

    /// Container searched first. `None` means scan every container.
    pub default_container_id: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            token_overlap_threshold: 0.8,
            default_container_id: None,
        }
    }
}

/// Reasoning loop limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard ceiling on Thought→Action→Observation iterations.
    pub max_iterations: usize,

    /// Observations longer than this are truncated before being fed back.
    pub observation_char_limit: usize,

    /// Thoughts longer than this are truncated before being surfaced.
    pub thought_char_limit: usize,

    pub max_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            observation_char_limit: 1000,
            thought_char_limit: 500,
            max_tokens: 2048,
        }
    }
}

/// Staged-rollout mode of the dual-path comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RolloutMode {
    /// Only the layered router runs.
    #[default]
    Disabled,
    /// Both run; the legacy decision is returned.
    Shadow,
    /// Both run; the layered decision is returned, legacy is the error fallback.
    Active,
}

impl RolloutMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "disabled" | "off" | "new" => Some(RolloutMode::Disabled),
            "shadow" => Some(RolloutMode::Shadow),
            "active" => Some(RolloutMode::Active),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub mode: RolloutMode,

    /// Routing log entries kept per session; oldest evicted first.
    pub log_capacity: usize,

    /// Utterances are truncated to this many characters in the log.
    pub message_preview_chars: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            mode: RolloutMode::Disabled,
            log_capacity: 100,
            message_preview_chars: 100,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file. Missing fields keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load defaults, then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `ISMS_*` environment overrides in place.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("ISMS_MAX_ITERATIONS") {
            self.executor.max_iterations = v
                .parse()
                .with_context(|| format!("ISMS_MAX_ITERATIONS: invalid value '{}'", v))?;
        }
        if let Some(v) = lookup("ISMS_TOKEN_OVERLAP") {
            self.resolver.token_overlap_threshold = v
                .parse()
                .with_context(|| format!("ISMS_TOKEN_OVERLAP: invalid value '{}'", v))?;
        }
        if let Some(v) = lookup("ISMS_CLASSIFIER_THRESHOLD") {
            self.router.classifier_override_threshold = v
                .parse()
                .with_context(|| format!("ISMS_CLASSIFIER_THRESHOLD: invalid value '{}'", v))?;
        }
        if let Some(v) = lookup("ISMS_ROUTER_MODE") {
            self.shadow.mode = RolloutMode::parse(&v)
                .with_context(|| format!("ISMS_ROUTER_MODE: unknown mode '{}'", v))?;
        }
        if let Some(v) = lookup("ISMS_ROUTING_LOG_CAPACITY") {
            self.shadow.log_capacity = v
                .parse()
                .with_context(|| format!("ISMS_ROUTING_LOG_CAPACITY: invalid value '{}'", v))?;
        }
        if let Some(v) = lookup("ISMS_DEFAULT_CONTAINER") {
            self.resolver.default_container_id = Some(v).filter(|s| !s.trim().is_empty());
        }
        self.validate()
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.executor.max_iterations > 0,
            "executor.max_iterations must be at least 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.resolver.token_overlap_threshold),
            "resolver.token_overlap_threshold must be within 0.0..=1.0"
        );
        anyhow::ensure!(
            self.shadow.log_capacity > 0,
            "shadow.log_capacity must be at least 1"
        );
        Ok(())
    }

    /// Set the iteration ceiling.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.executor.max_iterations = max_iterations;
        self
    }

    /// Set the token-overlap threshold.
    pub fn token_overlap_threshold(mut self, threshold: f32) -> Self {
        self.resolver.token_overlap_threshold = threshold;
        self
    }

    /// Set the default container.
    pub fn default_container(mut self, container_id: impl Into<String>) -> Self {
        self.resolver.default_container_id = Some(container_id.into());
        self
    }

    /// Set the rollout mode.
    pub fn rollout_mode(mut self, mode: RolloutMode) -> Self {
        self.shadow.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.executor.max_iterations, 10);
        assert_eq!(config.resolver.token_overlap_threshold, 0.8);
        assert_eq!(config.router.classifier_threshold, 0.7);
        assert_eq!(config.shadow.log_capacity, 100);
        assert_eq!(config.shadow.mode, RolloutMode::Disabled);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "executor:\n  max_iterations: 4\nshadow:\n  mode: shadow\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.executor.max_iterations, 4);
        assert_eq!(config.executor.observation_char_limit, 1000);
        assert_eq!(config.shadow.mode, RolloutMode::Shadow);
        assert_eq!(config.resolver.token_overlap_threshold, 0.8);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ISMS_MAX_ITERATIONS", "3"),
            ("ISMS_ROUTER_MODE", "active"),
            ("ISMS_DEFAULT_CONTAINER", "dom-1"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.executor.max_iterations, 3);
        assert_eq!(config.shadow.mode, RolloutMode::Active);
        assert_eq!(config.resolver.default_container_id.as_deref(), Some("dom-1"));
    }

    #[test]
    fn test_invalid_env_value_is_reported() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "ISMS_MAX_ITERATIONS").then(|| "ten".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ISMS_MAX_ITERATIONS"));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = EngineConfig::default().max_iterations(0);
        assert!(config.validate().is_err());
    }
}
