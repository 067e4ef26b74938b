// Store Configuration

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "FOSDEM_DB_PATH";
pub const ENV_READER_CONNECTIONS: &str = "FOSDEM_READER_CONNECTIONS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "FOSDEM_BUSY_TIMEOUT_MS";

/// Persistence layer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file; `None` opens a private in-memory store
    pub db_path: Option<PathBuf>,

    /// Maximum concurrent reader connections (file stores only)
    pub reader_connections: u32,

    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            reader_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Ephemeral store for tests and degraded mode
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Defaults overridden by `FOSDEM_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = lookup(ENV_DB_PATH)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let reader_connections = lookup(ENV_READER_CONNECTIONS)
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.reader_connections);

        let busy_timeout = lookup(ENV_BUSY_TIMEOUT_MS)
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);

        Self {
            db_path,
            reader_connections,
            busy_timeout,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.reader_connections, 4);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/fosdem.db"),
            (ENV_READER_CONNECTIONS, "8"),
            (ENV_BUSY_TIMEOUT_MS, "250"),
        ]));

        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/fosdem.db")));
        assert_eq!(config.reader_connections, 8);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_falls_back() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_DB_PATH, "  "),
            (ENV_READER_CONNECTIONS, "0"),
            (ENV_BUSY_TIMEOUT_MS, "soon"),
        ]));

        assert_eq!(config, StoreConfig::default());
    }
}
