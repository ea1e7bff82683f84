//! Application configuration
//!
//! JSON file settings with per-field defaults, overridden by environment
//! variables.

use crate::recorder::RecorderConfig;
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "REFLECT_API_URL";
pub const ENV_API_TOKEN: &str = "REFLECT_API_TOKEN";
pub const ENV_MAX_DURATION: &str = "REFLECT_MAX_DURATION";

/// Reflections API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub recorder: RecorderConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|t| !t.trim().is_empty()) {
            self.api.token = Some(token);
        }
        if let Some(raw) = lookup(ENV_MAX_DURATION) {
            self.recorder.max_duration_seconds = raw.trim().parse().map_err(|_| {
                AppError::Config(format!("{} must be a whole number of seconds, got '{}'", ENV_MAX_DURATION, raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.recorder.flush_interval_ms == 0 {
            return Err(AppError::Config("flushIntervalMs must be greater than 0".to_string()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(AppError::Config("api.baseUrl must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load configuration from an optional JSON file and the environment
pub fn load(path: Option<&Path>) -> AppResult<AppConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let config: AppConfig = serde_json::from_str(&raw)?;
            tracing::debug!("Loaded config from {}", path.display());
            config
        }
        None => AppConfig::default(),
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.recorder.max_duration_seconds, 300);
        assert_eq!(config.recorder.flush_interval_ms, 1000);
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert!(config.api.token.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recorder": {{"maxDurationSeconds": 120, "inputDevice": "USB Mic"}}, "api": {{"token": "abc"}}}}"#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.recorder.max_duration_seconds, 120);
        assert_eq!(config.recorder.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.recorder.flush_interval_ms, 1000);
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                (ENV_API_URL, "https://reflect.example/api"),
                (ENV_API_TOKEN, "tok"),
                (ENV_MAX_DURATION, "0"),
            ]))
            .unwrap();

        assert_eq!(config.api.base_url, "https://reflect.example/api");
        assert_eq!(config.api.token.as_deref(), Some("tok"));
        assert_eq!(config.recorder.max_duration_seconds, 0);
    }

    #[test]
    fn test_bad_max_duration_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[(ENV_MAX_DURATION, "five minutes")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.recorder.flush_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api.base_url = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(load(Some(file.path())), Err(AppError::Serialization(_))));
    }
}
