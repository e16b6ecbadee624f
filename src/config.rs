//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::compliance::optimizer::OptimizerConfig;
use crate::compliance::provider::ComplianceConfig;
use crate::offline::OfflineConfig;
use crate::routing::arbiter::ArbiterConfig;
use crate::routing::model::ModelConfig;
use crate::services::payment_orchestrator::OrchestratorConfig;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Postgres is optional; without it the durable journal store is used.
    pub database: Option<DatabaseConfig>,
    pub cache: Option<CacheConfig>,
    pub logging: LoggingConfig,
    pub model: ModelConfig,
    pub arbiter: ArbiterConfig,
    pub optimizer: OptimizerConfig,
    pub compliance: ComplianceConfig,
    pub offline: OfflineConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Read `key` and parse it, falling back to `default` when unset or empty.
/// A value that is set and fails to parse is an error.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            model: ModelConfig::from_env()?,
            arbiter: ArbiterConfig::from_env()?,
            optimizer: OptimizerConfig::from_env()?,
            compliance: ComplianceConfig::from_env()?,
            offline: OfflineConfig::from_env()?,
            orchestrator: OrchestratorConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        self.logging.validate()?;
        self.model.validate()?;
        self.arbiter.validate()?;
        self.optimizer.validate()?;
        self.compliance.validate()?;
        self.offline.validate()?;
        self.orchestrator.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// `None` when `DATABASE_URL` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };

        Ok(Some(DatabaseConfig {
            url,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_parse("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: env_parse("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.trim().parse().ok()),
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    /// `None` when `REDIS_URL` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let redis_url = match env::var("REDIS_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };

        Ok(Some(CacheConfig {
            redis_url,
            max_connections: env_parse("CACHE_MAX_CONNECTIONS", 10)?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_url_scheme_validation() {
        let config = CacheConfig {
            redis_url: "http://localhost:6379".to_string(),
            max_connections: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());
        config.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("PAYGRID_TEST_ENV_PARSE", "twenty");
        let result: Result<u32, _> = env_parse("PAYGRID_TEST_ENV_PARSE", 20);
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == "PAYGRID_TEST_ENV_PARSE"));
        std::env::remove_var("PAYGRID_TEST_ENV_PARSE");
        assert_eq!(env_parse("PAYGRID_TEST_ENV_PARSE", 20u32).unwrap(), 20);
    }

    #[test]
    fn test_malformed_tunables_are_rejected() {
        std::env::set_var("ARBITER_WEIGHT_SUCCESS", "0,3");
        let arbiter = ArbiterConfig::from_env();
        std::env::remove_var("ARBITER_WEIGHT_SUCCESS");
        assert!(matches!(arbiter, Err(ConfigError::InvalidValue(key)) if key == "ARBITER_WEIGHT_SUCCESS"));

        std::env::set_var("ROUTING_LEARNING_RATE", "fast");
        let model = ModelConfig::from_env();
        std::env::remove_var("ROUTING_LEARNING_RATE");
        assert!(matches!(model, Err(ConfigError::InvalidValue(key)) if key == "ROUTING_LEARNING_RATE"));

        std::env::set_var("OFFLINE_QR_TTL_SECS", "1h");
        let offline = OfflineConfig::from_env();
        std::env::remove_var("OFFLINE_QR_TTL_SECS");
        assert!(matches!(offline, Err(ConfigError::InvalidValue(key)) if key == "OFFLINE_QR_TTL_SECS"));
    }
}
