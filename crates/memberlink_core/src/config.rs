//! Runtime configuration for hosts embedding the link store.
//!
//! # Responsibility
//! - Collect database location and logging settings in one place.
//! - Read overrides from `MEMBERLINK_*` environment variables.
//!
//! # Invariants
//! - `database_path = None` means an in-memory database.
//! - `log_dir = None` disables file logging.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "MEMBERLINK_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "MEMBERLINK_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "MEMBERLINK_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Builds a config from process environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds a config from an explicit variable map.
    ///
    /// Blank values are treated as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        let lookup = |name: &str| {
            vars.get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let defaults = Self::default();
        Self {
            database_path: lookup(ENV_DB_PATH).map(PathBuf::from),
            log_level: lookup(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            log_dir: lookup(ENV_LOG_DIR).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreConfig, ENV_DB_PATH, ENV_LOG_DIR, ENV_LOG_LEVEL};
    use crate::logging::default_log_level;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn empty_environment_yields_defaults() {
        let config = CoreConfig::from_vars(HashMap::new());
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.log_level, default_log_level());
        assert!(config.database_path.is_none());
    }

    #[test]
    fn variables_override_defaults_and_blank_values_are_ignored() {
        let vars = HashMap::from([
            (ENV_DB_PATH.to_string(), "/tmp/links.db".to_string()),
            (ENV_LOG_LEVEL.to_string(), "warn".to_string()),
            (ENV_LOG_DIR.to_string(), "   ".to_string()),
        ]);
        let config = CoreConfig::from_vars(vars);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/links.db")));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_dir, None);
    }
}
