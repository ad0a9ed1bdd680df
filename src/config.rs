use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

/// Retry and id settings for the voting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total attempts for a unit of work, including the first one.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Node component of generated ids, must be below 1024.
    pub node_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/forum_ranking.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_base_delay_ms: 2,
            retry_max_delay_ms: 50,
            node_id: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to defaults
    /// for missing keys. Present but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_or(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                busy_timeout_ms: parse_or(
                    &lookup,
                    "DATABASE_BUSY_TIMEOUT_MS",
                    defaults.database.busy_timeout_ms,
                )?,
            },
            engine: EngineConfig {
                max_attempts: parse_or(&lookup, "VOTE_MAX_ATTEMPTS", defaults.engine.max_attempts)?,
                retry_base_delay_ms: parse_or(
                    &lookup,
                    "VOTE_RETRY_BASE_DELAY_MS",
                    defaults.engine.retry_base_delay_ms,
                )?,
                retry_max_delay_ms: parse_or(
                    &lookup,
                    "VOTE_RETRY_MAX_DELAY_MS",
                    defaults.engine.retry_max_delay_ms,
                )?,
                node_id: parse_or(&lookup, "NODE_ID", defaults.engine.node_id)?,
            },
            logging: LoggingConfig {
                filter: lookup("LOG_FILTER")
                    .or_else(|| lookup("RUST_LOG"))
                    .unwrap_or(defaults.logging.filter),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.database.max_connections > 0, "DATABASE_MAX_CONNECTIONS must be positive");
        anyhow::ensure!(self.engine.max_attempts > 0, "VOTE_MAX_ATTEMPTS must be positive");
        anyhow::ensure!(self.engine.node_id < 1024, "NODE_ID must be less than 1024");
        anyhow::ensure!(
            self.engine.retry_base_delay_ms <= self.engine.retry_max_delay_ms,
            "VOTE_RETRY_BASE_DELAY_MS must not exceed VOTE_RETRY_MAX_DELAY_MS"
        );
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database.url, "sqlite:data/forum_ranking.db");
        assert_eq!(config.engine.max_attempts, 8);
        assert_eq!(config.logging.filter, "info");
        assert!(!config.database.is_in_memory());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("VOTE_MAX_ATTEMPTS", "3"),
            ("NODE_ID", "42"),
            ("RUST_LOG", "forum_ranking=debug"),
        ]))
        .unwrap();

        assert!(config.database.is_in_memory());
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.node_id, 42);
        assert_eq!(config.logging.filter, "forum_ranking=debug");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Config::from_lookup(lookup_from(&[("VOTE_MAX_ATTEMPTS", "many")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("VOTE_MAX_ATTEMPTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("NODE_ID", "4096")])).is_err());
    }
}
