//! Runtime configuration
//!
//! Settings resolve in three tiers: environment variables, then an optional
//! TOML file, then compiled defaults. The Gemini API key additionally accepts
//! the generic `GEMINI_API_KEY` variable.

use crate::collector::CollectorConfig;
use crate::engines::GeminiSettings;
use crate::error::ComputeError;
use crate::pipeline::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const ENV_API_KEY: &str = "MINDSCOPE_GEMINI_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "GEMINI_API_KEY";
pub const ENV_MODEL: &str = "MINDSCOPE_GEMINI_MODEL";
pub const ENV_ENGINE_TIMEOUT: &str = "MINDSCOPE_ENGINE_TIMEOUT_SECS";
pub const ENV_LOG: &str = "MINDSCOPE_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All tunables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub collector: CollectorConfig,
    pub pipeline: PipelineSettings,
    pub gemini: GeminiSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse TOML; absent keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self, ComputeError> {
        toml::from_str(content).map_err(|e| ComputeError::Config(format!("Parse TOML failed: {e}")))
    }

    /// Read `path` (if given) and apply process environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ComputeError> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ComputeError::Config(format!("Read {} failed: {e}", path.display()))
                })?;
                let settings = Self::from_toml(&content)?;
                info!(path = %path.display(), "Loaded configuration file");
                settings
            }
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply overrides from `lookup` (environment variable name to value)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ComputeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let env_key = non_empty(ENV_API_KEY).or_else(|| non_empty(ENV_API_KEY_FALLBACK));
        let toml_has_key = self
            .gemini
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if let Some(key) = env_key {
            if toml_has_key {
                warn!("Gemini API key found in both environment and TOML; using environment");
            }
            self.gemini.api_key = Some(key);
        }

        if let Some(model) = non_empty(ENV_MODEL) {
            self.gemini.model = model;
        }

        if let Some(raw) = non_empty(ENV_ENGINE_TIMEOUT) {
            self.pipeline.engine_timeout_secs = raw.trim().parse().map_err(|_| {
                ComputeError::Config(format!(
                    "{ENV_ENGINE_TIMEOUT} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
        }

        if let Some(level) = non_empty(ENV_LOG) {
            self.logging.level = level;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ModalityFailurePolicy;
    use crate::test_logs::capture_logs;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.collector.target_samples, 60);
        assert_eq!(settings.collector.sampling_interval_ms, 1000);
        assert_eq!(settings.pipeline.engine_timeout_secs, 120);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.gemini.api_key.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let settings = Settings::from_toml(
            r#"
            [collector]
            sampling_interval_ms = 500

            [pipeline]
            modality_failure = "isolate"

            [gemini]
            api_key = "from-toml"
            "#,
        )
        .unwrap();

        assert_eq!(settings.collector.sampling_interval_ms, 500);
        assert_eq!(settings.collector.target_samples, 60);
        assert_eq!(settings.pipeline.modality_failure, ModalityFailurePolicy::Isolate);
        assert_eq!(settings.gemini.api_key.as_deref(), Some("from-toml"));
        assert_eq!(settings.gemini.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_env_overrides_toml() {
        let mut settings = Settings::from_toml("[gemini]\napi_key = \"from-toml\"\n").unwrap();
        settings
            .apply_env(env(&[
                (ENV_API_KEY, "from-env"),
                (ENV_MODEL, "gemini-1.5-pro"),
                (ENV_ENGINE_TIMEOUT, "30"),
                (ENV_LOG, "debug"),
            ]))
            .unwrap();

        assert_eq!(settings.gemini.api_key.as_deref(), Some("from-env"));
        assert_eq!(settings.gemini.model, "gemini-1.5-pro");
        assert_eq!(settings.pipeline.engine_timeout_secs, 30);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_fallback_key_and_blank_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[(ENV_API_KEY, "  "), (ENV_API_KEY_FALLBACK, "generic")]))
            .unwrap();
        assert_eq!(settings.gemini.api_key.as_deref(), Some("generic"));
    }

    #[test]
    fn test_bad_timeout_is_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_env(env(&[(ENV_ENGINE_TIMEOUT, "soon")]));
        assert!(matches!(result, Err(ComputeError::Config(_))));
    }

    #[test]
    fn test_load_events_reach_scoped_subscriber() {
        let path = std::env::temp_dir().join(format!("mindscope-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[collector]\ntarget_samples = 7\n").unwrap();

        let (settings, output) =
            capture_logs(tracing::Level::INFO, || Settings::load(Some(path.as_path())));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.unwrap().collector.target_samples, 7);
        assert!(output.contains("Loaded configuration file"), "{output}");
    }

    #[test]
    fn test_key_in_both_sources_warns() {
        let mut settings = Settings::from_toml("[gemini]\napi_key = \"from-toml\"\n").unwrap();

        let (result, output) = capture_logs(tracing::Level::WARN, || {
            settings.apply_env(env(&[(ENV_API_KEY, "from-env")]))
        });

        assert!(result.is_ok());
        assert!(output.contains("found in both environment and TOML"), "{output}");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Settings::from_toml("[collector\n").is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut settings = Settings::default();
        settings.gemini.api_key = Some("secret".to_string());
        let rendered = toml::to_string(&settings).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
