//! Configuration loading for the engine.
//!
//! All engine settings are loaded from a TOML configuration file. Every
//! section is optional and falls back to its defaults.

use std::path::Path;

use agora_events::QuotaLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::ClockConfig;
use crate::critic::CriticConfig;
use crate::decision::DecisionConfig;
use crate::emotion::EmotionConfig;
use crate::population::PopulationConfig;
use crate::reflection::ReflectionConfig;
use crate::reliability::ReliabilityConfig;
use crate::scheduler::SchedulerConfig;
use crate::telemetry::TelemetryConfig;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Tick interval, deadline, worker pool and ordering
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Virtual day length and calendar offset
    #[serde(default)]
    pub clock: ClockConfig,
    /// Daily action maxima
    #[serde(default)]
    pub quota: QuotaLimits,
    /// Inertia and event deltas
    #[serde(default)]
    pub emotion: EmotionConfig,
    /// Draft scoring and selection
    #[serde(default)]
    pub critic: CriticConfig,
    /// Desire threshold and jitter
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Provider timeout and fallback
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Daily rumination
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// Seeded agents
    #[serde(default)]
    pub population: PopulationConfig,
    /// Output files
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AgoraConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the configuration as a TOML string.
    pub fn to_toml(&self) -> Result<String, TomlSerializeError> {
        toml::to_string_pretty(self).map_err(TomlSerializeError)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.scheduler.interval_secs > 0.0) {
            return invalid(format!(
                "scheduler.interval_secs must be positive, got {}",
                self.scheduler.interval_secs
            ));
        }
        if let Some(deadline) = self.scheduler.deadline_secs {
            if !(deadline > 0.0) {
                return invalid(format!("scheduler.deadline_secs must be positive, got {}", deadline));
            }
        }
        if self.scheduler.max_concurrency == 0 {
            return invalid("scheduler.max_concurrency must be at least 1".to_string());
        }
        if !(self.reliability.timeout_secs > 0.0) {
            return invalid(format!(
                "reliability.timeout_secs must be positive, got {}",
                self.reliability.timeout_secs
            ));
        }
        if self.critic.candidates == 0 {
            return invalid("critic.candidates must be at least 1".to_string());
        }
        for (name, value) in [
            ("critic.quality_threshold", self.critic.quality_threshold),
            ("critic.min_similarity", self.critic.min_similarity),
            ("critic.heuristic_share", self.critic.heuristic_share),
            ("emotion.inertia", self.emotion.inertia),
            ("decision.activation_threshold", self.decision.activation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.reflection.max_patch_chars > self.reflection.max_persona_chars {
            return invalid(format!(
                "reflection.max_patch_chars ({}) exceeds reflection.max_persona_chars ({})",
                self.reflection.max_patch_chars, self.reflection.max_persona_chars
            ));
        }
        if self.telemetry.broadcast_capacity == 0 {
            return invalid("telemetry.broadcast_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Error that can occur during TOML serialization.
#[derive(Debug)]
pub struct TomlSerializeError(pub toml::ser::Error);

impl std::fmt::Display for TomlSerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TOML serialize error: {}", self.0)
    }
}

impl std::error::Error for TomlSerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Generates a default configuration file content.
pub fn default_config_toml() -> String {
    r##"# Agora Engine Configuration

[scheduler]
interval_secs = 600.0
# deadline_secs = 540.0
max_concurrency = 8
seed = 42
shuffle = true

[clock]
# Real seconds per virtual day; 0 uses calendar days
virtual_day_secs = 0
utc_offset_minutes = 0

[quota]
post = 1
comment = 2

[emotion]
inertia = 0.1

[emotion.perceive]
curiosity = 0.06
fatigue = 0.02

[emotion.high_signal]
curiosity = 0.04
excitement = 0.03

[emotion.like]
joy = 0.08
excitement = 0.05
frustration = -0.04
anxiety = -0.02

[emotion.reply]
joy = 0.1
excitement = 0.08
frustration = -0.05
anxiety = -0.03

[emotion.ignored]
frustration = 0.06
anxiety = 0.04

[emotion.error]
frustration = 0.05
anxiety = 0.03

[critic]
candidates = 3
history_window = 30
penalty_weight = 0.2
min_similarity = 0.55
quality_threshold = 0.7
max_chars = 280
heuristic_share = 0.6
use_judge = true
bonus_tags = ["#AI", "#agora"]

[critic.weights]
quality = 0.55
persona = 0.25
emotion = 0.2

[decision]
activation_threshold = 0.3
desire_jitter = 0.05

[reliability]
timeout_secs = 30.0
fallback_enabled = false

[reliability.primary]
kind = "template"

# [reliability.fallback]
# kind = "template"

[reflection]
enabled = true
budget_per_tick = 2
max_patch_chars = 80
max_persona_chars = 360
shift_magnitude = 0.05
sample_size = 3
temperature = 0.4
max_tokens = 160

[population]
size = 8
seed = 7
emotion_jitter = 0.12

[telemetry]
# jsonl_path = "agora_ticks.jsonl"
# heartbeat_path = "agora_heartbeat.json"
# snapshot_path = "agora_store.json"
broadcast_capacity = 256
"##
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderConfig;

    #[test]
    fn test_default_config() {
        let config = AgoraConfig::default();
        assert_eq!(config.scheduler.interval_secs, 600.0);
        assert_eq!(config.quota.post, 1);
        assert_eq!(config.quota.comment, 2);
        assert_eq!(config.critic.quality_threshold, 0.7);
        assert_eq!(config.reliability.timeout_secs, 30.0);
        assert!(!config.reliability.fallback_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_default_toml() {
        let config = AgoraConfig::from_str(&default_config_toml()).unwrap();
        let defaults = AgoraConfig::default();
        assert_eq!(config.scheduler.seed, defaults.scheduler.seed);
        assert_eq!(config.critic.weights, defaults.critic.weights);
        assert_eq!(config.critic.bonus_tags, defaults.critic.bonus_tags);
        assert_eq!(config.emotion.like, defaults.emotion.like);
        assert_eq!(config.emotion.error, defaults.emotion.error);
        assert_eq!(config.reflection.budget_per_tick, defaults.reflection.budget_per_tick);
        assert_eq!(config.population.size, defaults.population.size);
        assert_eq!(config.reliability.primary, ProviderConfig::Template);
        assert_eq!(config.reliability.fallback, None);
        assert!(config.telemetry.jsonl_path.is_none());
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
[quota]
post = 3

[critic.weights]
quality = 0.7
"#;
        let config = AgoraConfig::from_str(toml).unwrap();
        assert_eq!(config.quota.post, 3);
        assert_eq!(config.quota.comment, 2);
        assert_eq!(config.critic.weights.quality, 0.7);
        assert_eq!(config.critic.weights.persona, 0.25);
        assert_eq!(config.critic.candidates, 3);
        assert_eq!(config.scheduler.max_concurrency, 8);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgoraConfig::from_str("").unwrap();
        assert_eq!(config.scheduler.interval_secs, 600.0);
        assert!(config.reflection.enabled);
    }

    #[test]
    fn test_fallback_provider_config() {
        let toml = r#"
[reliability]
timeout_secs = 5.0
fallback_enabled = true

[reliability.primary]
kind = "unavailable"

[reliability.fallback]
kind = "template"
"#;
        let config = AgoraConfig::from_str(toml).unwrap();
        assert_eq!(config.reliability.primary, ProviderConfig::Unavailable);
        assert_eq!(config.reliability.fallback, Some(ProviderConfig::Template));
        assert!(config.reliability.fallback_enabled);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = AgoraConfig::from_str("[scheduler]\ninterval_secs = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = AgoraConfig::from_str("[critic]\nquality_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("critic.quality_threshold"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = AgoraConfig::from_str("[scheduler\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_to_toml_round_trip() {
        let mut config = AgoraConfig::default();
        config.scheduler.deadline_secs = Some(120.0);
        config.population.size = 3;
        let text = config.to_toml().unwrap();
        let parsed = AgoraConfig::from_str(&text).unwrap();
        assert_eq!(parsed.scheduler.deadline_secs, Some(120.0));
        assert_eq!(parsed.population.size, 3);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.toml");
        std::fs::write(&path, "[population]\nsize = 2\n").unwrap();
        let config = AgoraConfig::from_file(&path).unwrap();
        assert_eq!(config.population.size, 2);

        let missing = AgoraConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
