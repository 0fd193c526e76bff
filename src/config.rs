//! Configuration file support (`fayl.toml`).
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! query_location = "queries"
//! max_connections = 5
//!
//! [log]
//! level = "debug"
//! format = "json"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dialect::Placeholder;
use crate::error::{FaylError, FaylResult};

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE: &str = "fayl.toml";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connection URL
    pub database_url: Option<String>,

    /// Root directory of the query templates
    pub query_location: PathBuf,

    /// Driver identifier (`postgres`, `mysql`, `sqlite`, ...)
    pub driver: Option<String>,

    /// Placeholder dialect; derived from the driver or URL when absent
    #[serde(rename = "placeholder")]
    pub placeholder_style: Option<Placeholder>,

    /// Pool size
    pub max_connections: u32,

    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            query_location: PathBuf::from("queries"),
            driver: None,
            placeholder_style: None,
            max_connections: 5,
            log: LogConfig::default(),
        }
    }
}

/// Diagnostics settings for the binary's subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `fayl=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from `path`, else `./fayl.toml`, else the user config dir.
    ///
    /// Falls back to defaults when no file exists. An explicit path that does
    /// not exist is an error.
    pub fn load(path: Option<&Path>) -> FaylResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|dir| dir.join("fayl").join(CONFIG_FILE)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> FaylResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| FaylError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| FaylError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> FaylResult<Self> {
        toml::from_str(content).map_err(|e| FaylError::Config(e.to_string()))
    }

    /// The effective placeholder dialect.
    pub fn placeholder(&self) -> Option<Placeholder> {
        self.placeholder_style
            .or_else(|| self.driver.as_deref().and_then(Placeholder::for_driver))
            .or_else(|| self.database_url.as_deref().and_then(Placeholder::for_driver))
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Set the query root
    pub fn queries(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.query_location = path.into();
        self
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.config.driver = Some(driver.into());
        self
    }

    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.config.placeholder_style = Some(placeholder);
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml(
            r#"
            database_url = "postgres://localhost/app"
            query_location = "sql"

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.query_location, PathBuf::from("sql"));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.placeholder(), Some(Placeholder::Dollar));
    }

    #[test]
    fn test_explicit_placeholder_wins() {
        let config = Config::builder()
            .database("mysql://localhost/app")
            .placeholder(Placeholder::AtP)
            .build();
        assert_eq!(config.placeholder(), Some(Placeholder::AtP));

        let by_driver = Config::builder().database("x://y").driver("sqlite").build();
        assert_eq!(by_driver.placeholder(), Some(Placeholder::Question));
    }

    #[test]
    fn test_bad_config() {
        assert!(matches!(
            Config::from_toml("max_connections = \"many\""),
            Err(FaylError::Config(_))
        ));
        assert!(Config::load(Some(Path::new("/nonexistent/fayl.toml"))).is_err());
    }
}
