//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::net::SocketAddr;
use user_wallet::{DatabaseConfig, GatewaySettings, LedgerConfig};

/// Default bind address when neither `--bind` nor `SERVER_BIND` is set
pub const DEFAULT_BIND: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 8080));

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Where the ledger lives
    pub storage: StorageConfig,
    /// Ledger tuning
    pub ledger: LedgerConfig,
    /// Checkout gateway settings
    pub gateway: GatewaySettings,
    /// Display currency
    pub currency: CurrencyConfig,
    /// Bearer token callers must present on `/api/v1` (required)
    pub api_token: String,
    /// Prometheus exporter address; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
}

/// Ledger storage backend
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Process-local store; balances vanish on restart
    Memory,
    Postgres(DatabaseConfig),
}

/// Currency used to render minor units for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyConfig {
    pub code: String,
    pub decimals: u32,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            code: "USD".to_string(),
            decimals: 2,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `force_memory` - Use the in-memory store regardless of `LEDGER_STORAGE`
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        force_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_optional_env("SERVER_BIND")?.unwrap_or(DEFAULT_BIND),
        };

        let storage_kind = std::env::var("LEDGER_STORAGE").unwrap_or_else(|_| "postgres".into());
        let storage = if force_memory {
            StorageConfig::Memory
        } else {
            match storage_kind.to_lowercase().as_str() {
                "memory" => StorageConfig::Memory,
                "postgres" => {
                    let mut database = DatabaseConfig::from_env();
                    if let Some(url) = database_url_override {
                        database.database_url = url;
                    }
                    StorageConfig::Postgres(database)
                }
                other => {
                    return Err(ConfigError::Invalid {
                        var: "LEDGER_STORAGE".to_string(),
                        reason: format!("Unknown backend {other:?}, expected postgres or memory"),
                    });
                }
            }
        };

        // Service token (REQUIRED)
        let api_token =
            std::env::var("LEDGER_API_TOKEN").map_err(|_| ConfigError::MissingRequired {
                var: "LEDGER_API_TOKEN".to_string(),
                hint: "Generate with: openssl rand -hex 32".to_string(),
            })?;

        let currency = CurrencyConfig {
            code: std::env::var("CURRENCY_CODE").unwrap_or_else(|_| "USD".to_string()),
            decimals: parse_env_or("CURRENCY_DECIMALS", 2),
        };

        Ok(ServerConfig {
            bind,
            storage,
            ledger: LedgerConfig::from_env(),
            gateway: GatewaySettings::from_env(),
            currency,
            api_token,
            metrics_bind: parse_optional_env("METRICS_BIND")?,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_token.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "LEDGER_API_TOKEN".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.currency.decimals > 6 {
            return Err(ConfigError::Invalid {
                var: "CURRENCY_DECIMALS".to_string(),
                reason: "Must be at most 6".to_string(),
            });
        }

        if self.currency.code.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "CURRENCY_CODE".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.ledger.max_reference_len == 0 {
            return Err(ConfigError::Invalid {
                var: "LEDGER_MAX_REFERENCE_LEN".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if let StorageConfig::Postgres(database) = &self.storage
            && database.min_connections > database.max_connections
        {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    database.max_connections
                ),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("Must differ from the server bind address ({})", self.bind),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Unset is `None`; set but unparseable is an error
fn parse_optional_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|e| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("{e}"),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            storage: StorageConfig::Memory,
            ledger: LedgerConfig::default(),
            gateway: GatewaySettings::default(),
            currency: CurrencyConfig::default(),
            api_token: "a".repeat(32),
            metrics_bind: None,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "LEDGER_API_TOKEN".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("LEDGER_API_TOKEN"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_short_token() {
        let config = ServerConfig {
            api_token: "short".to_string(),
            ..valid_config()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LEDGER_API_TOKEN"));
    }

    #[test]
    fn test_config_validation_currency_decimals() {
        let config = ServerConfig {
            currency: CurrencyConfig {
                code: "USD".to_string(),
                decimals: 9,
            },
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let config = ServerConfig {
            storage: StorageConfig::Postgres(DatabaseConfig {
                min_connections: 50,
                max_connections: 10,
                ..DatabaseConfig::default()
            }),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_metrics_port_clash() {
        let config = valid_config();
        let config = ServerConfig {
            metrics_bind: Some(config.bind),
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_requires_token() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe {
            std::env::remove_var("LEDGER_API_TOKEN");
        }
        let err = ServerConfig::from_env(None, None, true).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe {
            std::env::set_var("LEDGER_API_TOKEN", "t".repeat(40));
            std::env::set_var("LEDGER_STORAGE", "postgres");
        }

        let bind: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        let config =
            ServerConfig::from_env(Some(bind), Some("postgres://x@db/wallet".to_string()), false)
                .unwrap();
        assert_eq!(config.bind, bind);
        match config.storage {
            StorageConfig::Postgres(db) => assert_eq!(db.database_url, "postgres://x@db/wallet"),
            StorageConfig::Memory => panic!("expected postgres storage"),
        }

        let config = ServerConfig::from_env(None, None, true).unwrap();
        assert!(matches!(config.storage, StorageConfig::Memory));

        unsafe {
            std::env::remove_var("LEDGER_API_TOKEN");
            std::env::remove_var("LEDGER_STORAGE");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_storage() {
        unsafe {
            std::env::set_var("LEDGER_API_TOKEN", "t".repeat(40));
            std::env::set_var("LEDGER_STORAGE", "redis");
        }
        let err = ServerConfig::from_env(None, None, false).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LEDGER_STORAGE"));
        unsafe {
            std::env::remove_var("LEDGER_API_TOKEN");
            std::env::remove_var("LEDGER_STORAGE");
        }
    }
}
