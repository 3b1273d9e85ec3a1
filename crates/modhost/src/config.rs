//! Configuration management for the module host.
//!
//! Settings are loaded from a TOML file. A missing file is replaced by a
//! default one so a fresh install starts with something to edit.

use modhost_runtime::HostConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_force_shutdown_timeout() -> u64 {
    10
}

fn default_graceful_shutdown_timeout() -> u64 {
    30
}

/// Application configuration loaded from `modhost.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub modules: ModuleSettings,
    pub logging: LoggingSettings,
}

/// Where modules live and how long shutdown may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Root directory searched recursively for module files
    pub directory: String,
    /// Upper bound for a forced shutdown, in seconds
    #[serde(default = "default_force_shutdown_timeout")]
    pub force_shutdown_timeout_secs: u64,
    /// How long a graceful shutdown waits for plugins, in seconds
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            modules: ModuleSettings {
                directory: "modules".to_string(),
                force_shutdown_timeout_secs: default_force_shutdown_timeout(),
                graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the default
    /// configuration to `path` first if it does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The configured module directory as a path.
    pub fn module_directory(&self) -> PathBuf {
        PathBuf::from(&self.modules.directory)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.modules.graceful_shutdown_timeout_secs)
    }

    /// Host tunables derived from the `[modules]` section.
    pub fn to_host_config(&self) -> HostConfig {
        HostConfig {
            force_shutdown_timeout: Duration::from_secs(self.modules.force_shutdown_timeout_secs),
        }
    }

    /// Checks the configuration for values the host cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.modules.directory.is_empty() {
            return Err("Module directory cannot be empty".to_string());
        }

        if self.modules.force_shutdown_timeout_secs == 0 {
            return Err("force_shutdown_timeout_secs must be greater than zero".to_string());
        }
        if self.modules.graceful_shutdown_timeout_secs == 0 {
            return Err("graceful_shutdown_timeout_secs must be greater than zero".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.modules.directory, "modules");
        assert_eq!(config.modules.force_shutdown_timeout_secs, 10);
        assert_eq!(config.modules.graceful_shutdown_timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("modhost.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.modules.directory, "modules");

        // The default file is written and reads back identically.
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.modules.force_shutdown_timeout_secs, 10);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[modules]
directory = "/opt/modhost/modules"
force_shutdown_timeout_secs = 3
graceful_shutdown_timeout_secs = 12

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.modules.directory, "/opt/modhost/modules");
        assert_eq!(config.module_directory(), PathBuf::from("/opt/modhost/modules"));
        assert_eq!(config.modules.force_shutdown_timeout_secs, 3);
        assert_eq!(config.graceful_shutdown_timeout(), Duration::from_secs(12));
        assert_eq!(
            config.to_host_config().force_shutdown_timeout,
            Duration::from_secs(3)
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[modules\ndirectory = ").await.unwrap();

        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[modules]
directory = "mods"

[logging]
level = "warn"
"#,
        )
        .unwrap();

        assert_eq!(config.modules.force_shutdown_timeout_secs, 10);
        assert_eq!(config.modules.graceful_shutdown_timeout_secs, 30);
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_validation_empty_module_directory() {
        let mut config = AppConfig::default();
        config.modules.directory = String::new();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Module directory cannot be empty"));
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let mut config = AppConfig::default();
        config.modules.force_shutdown_timeout_secs = 0;
        assert!(config.validate().unwrap_err().contains("force_shutdown_timeout_secs"));

        let mut config = AppConfig::default();
        config.modules.graceful_shutdown_timeout_secs = 0;
        assert!(config.validate().unwrap_err().contains("graceful_shutdown_timeout_secs"));
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        for level in ["trace", "debug", "info", "warn", "error"] {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "level {} should be valid", level);
        }

        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }
}
