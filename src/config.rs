//! Configuration management for limiters.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{Rate, TimeUnit};
use crate::storage::StoreConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "DRIP";

/// Configuration for one limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace for the limiter's buckets
    pub identifier: String,

    /// Rate ceilings, in any order
    #[serde(default)]
    pub rates: Vec<RateConfig>,

    /// Where bucket state is stored
    #[serde(default)]
    pub store: StoreConfig,
}

/// A single rate ceiling as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Number of units allowed per time unit
    pub limit: f64,
    /// The time unit
    pub unit: TimeUnit,
    /// Whether the bucket may fill to the full limit at once
    #[serde(default = "default_allow_burst")]
    pub allow_burst: bool,
}

fn default_allow_burst() -> bool {
    true
}

impl RateConfig {
    /// Validate and build the rate.
    pub fn to_rate(&self) -> Result<Rate> {
        Rate::new(self.limit, self.unit, self.allow_burst)
    }
}

impl LimiterConfig {
    /// Create a configuration with in-memory storage.
    pub fn new(identifier: impl Into<String>, rates: Vec<RateConfig>) -> Self {
        Self {
            identifier: identifier.into(),
            rates,
            store: StoreConfig::default(),
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Load configuration from a file, applying `DRIP__*` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g. `DRIP__STORE__HOST`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Build every configured rate, failing on the first invalid one.
    pub fn rates(&self) -> Result<Vec<Rate>> {
        self.rates.iter().map(RateConfig::to_rate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RedisConfig, SqliteConfig};

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
identifier: api
rates:
  - limit: 5
    unit: second
  - limit: 1000
    unit: hour
    allow_burst: false
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.identifier, "api");
        assert_eq!(config.rates.len(), 2);
        assert!(config.rates[0].allow_burst);
        assert!(!config.rates[1].allow_burst);
        assert_eq!(config.rates[1].unit, TimeUnit::Hour);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_parse_redis_store() {
        let yaml = r#"
identifier: shared
rates:
  - limit: 30
    unit: minute
store:
  backend: redis
  host: redis.internal
  port: 6380
  database: 3
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Redis(RedisConfig {
                host: "redis.internal".to_string(),
                port: 6380,
                database: 3,
                password: None,
            })
        );
    }

    #[test]
    fn test_parse_sqlite_store_with_default_path() {
        let yaml = r#"
identifier: local
rates:
  - limit: 1
    unit: day
store:
  backend: sqlite
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store, StoreConfig::Sqlite(SqliteConfig::default()));
    }

    #[test]
    fn test_rejects_unknown_unit() {
        let yaml = r#"
identifier: api
rates:
  - limit: 5
    unit: fortnight
"#;
        assert!(matches!(
            LimiterConfig::from_yaml(yaml),
            Err(LimiterError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_rate_surfaces_as_invalid_argument() {
        let config = LimiterConfig::new(
            "api",
            vec![RateConfig {
                limit: 0.0,
                unit: TimeUnit::Second,
                allow_burst: true,
            }],
        );
        assert!(matches!(config.rates(), Err(LimiterError::InvalidArgument(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("drip-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "identifier: from-file\nrates:\n  - limit: 2\n    unit: second\n",
        )
        .unwrap();

        let config = LimiterConfig::load(&path).unwrap();
        assert_eq!(config.identifier, "from-file");
        assert_eq!(config.rates[0].limit, 2.0);

        let _ = std::fs::remove_file(&path);
    }
}
