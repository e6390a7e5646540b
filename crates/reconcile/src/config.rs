use conta_import::match_engine::check_threshold;
use conta_import::{MatchConfig, MatchConfigError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Match(#[from] MatchConfigError),
    #[error("Auto-merge threshold {auto} must not be below the suggestion threshold {suggest}")]
    AutoBelowSuggest { auto: f32, suggest: f32 },
}

/// Unattended merging; stricter than interactive suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMergeConfig {
    pub threshold: f32,
    /// Only entries dated within this many days of today are considered.
    pub recency_days: u32,
}

impl Default for AutoMergeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            recency_days: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Score above which a statement line is treated as an already imported
    /// line whose FITID changed.
    pub fingerprint_threshold: f32,
    pub require_category: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            fingerprint_threshold: 0.85,
            require_category: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub matching: MatchConfig,
    pub auto: AutoMergeConfig,
    pub import: ImportConfig,
}

impl ReconcileConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: ReconcileConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        check_threshold("auto.threshold", self.auto.threshold)?;
        check_threshold("import.fingerprint_threshold", self.import.fingerprint_threshold)?;
        if self.auto.threshold < self.matching.suggest_threshold {
            return Err(ConfigError::AutoBelowSuggest {
                auto: self.auto.threshold,
                suggest: self.matching.suggest_threshold,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReconcileConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ReconcileConfig::from_toml("").unwrap();
        assert_eq!(config, ReconcileConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let config = ReconcileConfig::from_toml(
            r#"
            [matching]
            date_window_days = 5

            [auto]
            recency_days = 30

            [import]
            require_category = true
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.date_window_days, 5);
        assert_eq!(config.matching.min_description_chars, 3);
        assert_eq!(config.auto.recency_days, 30);
        assert_eq!(config.auto.threshold, 0.85);
        assert!(config.import.require_category);
    }

    #[test]
    fn auto_threshold_below_suggestion_is_rejected() {
        let err = ReconcileConfig::from_toml("[auto]\nthreshold = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::AutoBelowSuggest { .. }));
    }

    #[test]
    fn bad_weights_are_rejected() {
        let err = ReconcileConfig::from_toml("[matching]\nweight_amount = 0.9\n").unwrap_err();
        assert!(matches!(err, ConfigError::Match(MatchConfigError::WeightSum(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            ReconcileConfig::from_toml("[auto\nthreshold ="),
            Err(ConfigError::Toml(_))
        ));
    }
}
