//! Environment-driven configuration.
//!
//! | variable                      | default  |
//! |-------------------------------|----------|
//! | `LEDGER_STORE`                | `memory` |
//! | `DATABASE_URL`                | required for `postgres` |
//! | `LEDGER_DB_MAX_CONNECTIONS`   | `10`     |
//! | `LEDGER_OPERATION_TIMEOUT_MS` | `5000` (`0` disables the deadline) |
//! | `LEDGER_LOG_FORMAT`           | `json`   |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgeledger_observability::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when LEDGER_STORE=postgres")]
    Missing(&'static str),
}

/// Which ledger store backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Default deadline for each engine operation; `None` means unbounded.
    pub operation_timeout: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            database_url: None,
            db_max_connections: 10,
            operation_timeout: Some(Duration::from_millis(5000)),
            log_format: LogFormat::Json,
        }
    }
}

impl LedgerConfig {
    /// Install the process-wide subscriber in the configured format.
    pub fn init_logging(&self) {
        forgeledger_observability::init(self.log_format);
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset variables fall back to dev defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get("LEDGER_STORE") {
            None => defaults.store,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "LEDGER_STORE",
                        value: v,
                        reason: "expected 'memory' or 'postgres'".to_string(),
                    });
                }
            },
        };

        let database_url = get("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let db_max_connections = match get("LEDGER_DB_MAX_CONNECTIONS") {
            None => defaults.db_max_connections,
            Some(v) => match v.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        var: "LEDGER_DB_MAX_CONNECTIONS",
                        value: v,
                        reason: "must be at least 1".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: "LEDGER_DB_MAX_CONNECTIONS",
                        value: v,
                        reason: e.to_string(),
                    });
                }
            },
        };

        let operation_timeout = match get("LEDGER_OPERATION_TIMEOUT_MS") {
            None => defaults.operation_timeout,
            Some(v) => match v.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: "LEDGER_OPERATION_TIMEOUT_MS",
                        value: v,
                        reason: e.to_string(),
                    });
                }
            },
        };

        let log_format = match get("LEDGER_LOG_FORMAT") {
            None => defaults.log_format,
            Some(v) => v.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                var: "LEDGER_LOG_FORMAT",
                value: v.clone(),
                reason: e.to_string(),
            })?,
        };

        Ok(Self {
            store,
            database_url,
            db_max_connections,
            operation_timeout,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_dev_defaults() {
        assert_eq!(load(&[]).unwrap(), LedgerConfig::default());
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(
            load(&[("LEDGER_STORE", "postgres")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );

        let cfg = load(&[
            ("LEDGER_STORE", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("LEDGER_DB_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(cfg.store, StoreBackend::Postgres);
        assert_eq!(cfg.db_max_connections, 4);
    }

    #[test]
    fn zero_timeout_disables_the_deadline() {
        let cfg = load(&[("LEDGER_OPERATION_TIMEOUT_MS", "0")]).unwrap();
        assert_eq!(cfg.operation_timeout, None);

        let cfg = load(&[("LEDGER_OPERATION_TIMEOUT_MS", "250")]).unwrap();
        assert_eq!(cfg.operation_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (var, value) in [
            ("LEDGER_STORE", "sqlite"),
            ("LEDGER_DB_MAX_CONNECTIONS", "0"),
            ("LEDGER_DB_MAX_CONNECTIONS", "many"),
            ("LEDGER_OPERATION_TIMEOUT_MS", "-1"),
            ("LEDGER_LOG_FORMAT", "xml"),
        ] {
            let err = load(&[(var, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value}: {err}"
            );
        }
    }
}
