use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{FlowError, FlowResult};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Iteration caps applied when a loop step omits `maxIterations`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub while_max_iterations: usize,
    pub for_max_iterations: usize,
    pub for_each_max_iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_rule_depth: usize,
    pub default_wait_between_pages_ms: u64,
    pub default_max_pages: u32,
    pub absolutize_urls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_format: String,
    pub output_directory: PathBuf,
    pub pretty_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub max_files: usize,
    pub log_directory: PathBuf,
    pub include_targets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            while_max_iterations: 100,
            for_max_iterations: 1000,
            for_each_max_iterations: 1000,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_rule_depth: 16,
            default_wait_between_pages_ms: 2000,
            default_max_pages: 1,
            absolutize_urls: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: "json".to_string(),
            output_directory: get_data_directory().join("exports"),
            pretty_json: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            console_enabled: true,
            max_files: 5,
            log_directory: get_data_directory().join("logs"),
            include_targets: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub async fn load() -> FlowResult<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> FlowResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|_| FlowError::InvalidConfig {
            path: path.display().to_string(),
        })?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| FlowError::config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a specific file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> FlowResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| FlowError::config(e.to_string()))?;
        tokio::fs::write(path, content).await?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> FlowResult<()> {
        if self.engine.while_max_iterations == 0 {
            return Err(FlowError::config("engine.while_max_iterations must be > 0"));
        }

        if self.engine.for_max_iterations == 0 || self.engine.for_each_max_iterations == 0 {
            return Err(FlowError::config("engine loop iteration caps must be > 0"));
        }

        if self.extraction.max_rule_depth == 0 {
            return Err(FlowError::config("extraction.max_rule_depth must be > 0"));
        }

        if self.extraction.default_max_pages == 0 {
            return Err(FlowError::config("extraction.default_max_pages must be > 0"));
        }

        Ok(())
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "winscrape", "flow")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "winscrape", "flow")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("WSF_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(depth) = lookup("WSF_MAX_RULE_DEPTH").and_then(|v| v.parse().ok()) {
            config.extraction.max_rule_depth = depth;
        }

        if let Some(cap) = lookup("WSF_WHILE_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            config.engine.while_max_iterations = cap;
        }

        if let Some(wait) = lookup("WSF_WAIT_BETWEEN_PAGES_MS").and_then(|v| v.parse().ok()) {
            config.extraction.default_wait_between_pages_ms = wait;
        }

        if let Some(dir) = lookup("WSF_OUTPUT_DIR") {
            config.export.output_directory = PathBuf::from(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.while_max_iterations, 100);
        assert_eq!(config.engine.for_max_iterations, 1000);
        assert_eq!(config.extraction.default_wait_between_pages_ms, 2000);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let mut config = AppConfig::default();
        config.extraction.max_rule_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WSF_LOG_LEVEL", "debug"),
            ("WSF_MAX_RULE_DEPTH", "4"),
            ("WSF_WHILE_MAX_ITERATIONS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        ConfigOverrides::apply_from(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.extraction.max_rule_depth, 4);
        assert_eq!(config.engine.while_max_iterations, 100);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.engine.for_each_max_iterations = 42;
        config.save_to_file(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.engine.for_each_max_iterations, 42);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("[engine]\nwhile_max_iterations = 7\n").unwrap();
        assert_eq!(config.engine.while_max_iterations, 7);
        assert_eq!(config.engine.for_max_iterations, 1000);
        assert_eq!(config.extraction.max_rule_depth, 16);
    }
}
