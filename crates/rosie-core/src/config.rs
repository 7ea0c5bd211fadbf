use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::time::Duration;

use crate::planning::ShapeLimits;

fn default_db_path() -> String {
    "rosie_events.db".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_scan_batch_size() -> usize {
    512
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Directory levels a cluster may occupy below the scan root.
    #[serde(default)]
    pub max_depth: Option<i64>,
    /// Maximum immediate children per generated directory.
    #[serde(default)]
    pub max_children: Option<i64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_depth: None,
            max_children: None,
            poll_interval_ms: default_poll_interval_ms(),
            scan_batch_size: default_scan_batch_size(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            rules_path: None,
        }
    }
}

impl AppConfig {
    pub fn shape_limits(&self) -> ShapeLimits {
        ShapeLimits {
            max_depth: self.max_depth,
            max_children: self.max_children,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load `Rosie.{toml,json,yaml}` from the working directory (optional),
/// then apply `ROSIE_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Rosie").required(false))
        .add_source(Environment::with_prefix("ROSIE").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults_when_nothing_configured() {
        let config = Config::builder().build().unwrap();
        let app: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app.db_path, "rosie_events.db");
        assert_eq!(app.poll_interval_ms, 200);
        assert_eq!(app.scan_batch_size, 512);
        assert!(app.max_depth.is_none());
        assert!(app.include_patterns.is_empty());
    }

    #[test]
    fn test_limits_from_toml() {
        let config = Config::builder()
            .add_source(ConfigFile::from_str(
                "max_depth = 2\nmax_children = 3\nexclude_patterns = [\"*.tmp\"]",
                FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let app: AppConfig = config.try_deserialize().unwrap();
        let limits = app.shape_limits();
        assert_eq!(limits.max_depth, Some(2));
        assert_eq!(limits.max_children, Some(3));
        assert_eq!(app.exclude_patterns, vec!["*.tmp".to_string()]);
    }
}
