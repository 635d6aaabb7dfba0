//! Typed configuration read from the environment (after `.env` is loaded by `main`).
//!
//! Each section has `from_env` with defaults and `validate`; `AppConfig::validate`
//! runs them all before anything is started.

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub workers: WorkerConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
    /// Run on the in-memory store and offline gateway (`SKIP_EXTERNALS=true`).
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for the confirmation long-poll endpoint.
    pub confirmation_max_wait_secs: u64,
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

/// Payment gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub default_currency: String,
}

/// Webhook worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub retry_interval_secs: u64,
    /// Ledger rows untouched for this long are re-claimed by the retry worker.
    pub stale_after_secs: u64,
    pub max_ledger_attempts: i32,
    pub retry_enabled: bool,
}

/// Reconciliation sweeper configuration
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lookback_hours: i64,
    pub batch_size: i64,
    /// Orders younger than this are left to the webhook path.
    pub probe_min_age_secs: i64,
    pub ledger_retention_days: i64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();
        let skip_externals = flag_var("SKIP_EXTERNALS", false);

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                DatabaseConfig::in_memory()
            } else {
                DatabaseConfig::from_env()?
            },
            gateway: GatewayConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
            reconcile: ReconcileConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.gateway.validate()?;
        if !self.skip_externals {
            self.gateway.validate_credentials()?;
        }
        self.workers.validate()?;
        self.reconcile.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag_var(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() != "false")
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", "8000")?,
            confirmation_max_wait_secs: parse_var("CONFIRMATION_MAX_WAIT_SECS", "20")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    /// Placeholder used when the service runs without Postgres (`SKIP_EXTERNALS=true`).
    pub fn in_memory() -> Self {
        DatabaseConfig {
            url: "memory://".to_string(),
            max_connections: 1,
            min_connections: 0,
            connection_timeout: 1,
            idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

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

impl GatewayConfig {
    /// Fails when `RAZORPAY_WEBHOOK_SECRET` is unset or blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_secret = env::var("RAZORPAY_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("RAZORPAY_WEBHOOK_SECRET".to_string()))?;

        Ok(GatewayConfig {
            key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            key_secret: env::var("RAZORPAY_KEY_SECRET").unwrap_or_default(),
            webhook_secret,
            base_url: env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            timeout_secs: parse_var("RAZORPAY_TIMEOUT_SECS", "15")?,
            max_retries: parse_var("RAZORPAY_MAX_RETRIES", "3")?,
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API credentials are only needed when talking to the real gateway.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.key_id.trim().is_empty() {
            return Err(ConfigError::MissingVariable("RAZORPAY_KEY_ID".to_string()));
        }
        if self.key_secret.trim().is_empty() {
            return Err(ConfigError::MissingVariable("RAZORPAY_KEY_SECRET".to_string()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "RAZORPAY_WEBHOOK_SECRET".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "RAZORPAY_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("RAZORPAY_TIMEOUT_SECS".to_string()));
        }

        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue("DEFAULT_CURRENCY".to_string()));
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 1024,
            max_attempts: 4,
            base_backoff_ms: 250,
            retry_interval_secs: 60,
            stale_after_secs: 120,
            max_ledger_attempts: 8,
            retry_enabled: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(WorkerConfig {
            pool_size: parse_var("WEBHOOK_WORKERS", &defaults.pool_size.to_string())?,
            queue_capacity: parse_var(
                "WEBHOOK_QUEUE_CAPACITY",
                &defaults.queue_capacity.to_string(),
            )?,
            max_attempts: parse_var(
                "WEBHOOK_MAX_ATTEMPTS",
                &defaults.max_attempts.to_string(),
            )?,
            base_backoff_ms: parse_var(
                "WEBHOOK_BACKOFF_MS",
                &defaults.base_backoff_ms.to_string(),
            )?,
            retry_interval_secs: parse_var(
                "WEBHOOK_RETRY_INTERVAL_SECS",
                &defaults.retry_interval_secs.to_string(),
            )?,
            stale_after_secs: parse_var(
                "WEBHOOK_STALE_AFTER_SECS",
                &defaults.stale_after_secs.to_string(),
            )?,
            max_ledger_attempts: parse_var(
                "WEBHOOK_MAX_LEDGER_ATTEMPTS",
                &defaults.max_ledger_attempts.to_string(),
            )?,
            retry_enabled: flag_var("WEBHOOK_RETRY_ENABLED", true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue("WEBHOOK_WORKERS".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("WEBHOOK_QUEUE_CAPACITY".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("WEBHOOK_MAX_ATTEMPTS".to_string()));
        }
        Ok(())
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            lookback_hours: 48,
            batch_size: 100,
            probe_min_age_secs: 300,
            ledger_retention_days: 90,
        }
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(ReconcileConfig {
            enabled: flag_var("RECONCILE_ENABLED", true),
            interval_secs: parse_var(
                "RECONCILE_INTERVAL_SECS",
                &defaults.interval_secs.to_string(),
            )?,
            lookback_hours: parse_var(
                "RECONCILE_LOOKBACK_HOURS",
                &defaults.lookback_hours.to_string(),
            )?,
            batch_size: parse_var("RECONCILE_BATCH_SIZE", &defaults.batch_size.to_string())?,
            probe_min_age_secs: parse_var(
                "RECONCILE_PROBE_MIN_AGE_SECS",
                &defaults.probe_min_age_secs.to_string(),
            )?,
            ledger_retention_days: parse_var(
                "LEDGER_RETENTION_DAYS",
                &defaults.ledger_retention_days.to_string(),
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::InvalidValue("RECONCILE_INTERVAL_SECS".to_string()));
        }
        if self.lookback_hours <= 0 {
            return Err(ConfigError::InvalidValue("RECONCILE_LOOKBACK_HOURS".to_string()));
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("RECONCILE_BATCH_SIZE".to_string()));
        }
        if self.ledger_retention_days <= 0 {
            return Err(ConfigError::InvalidValue("LEDGER_RETENTION_DAYS".to_string()));
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

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "secret".to_string(),
            webhook_secret: "whsec".to_string(),
            base_url: "https://api.razorpay.com".to_string(),
            timeout_secs: 15,
            max_retries: 3,
            default_currency: "INR".to_string(),
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            confirmation_max_wait_secs: 20,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            confirmation_max_wait_secs: 20,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_requires_webhook_secret() {
        let mut config = gateway();
        assert!(config.validate().is_ok());

        config.webhook_secret = "   ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_gateway_credentials_required_for_live_gateway() {
        let mut config = gateway();
        assert!(config.validate_credentials().is_ok());

        config.key_secret = String::new();
        assert!(config.validate().is_ok());
        assert!(config.validate_credentials().is_err());
    }

    #[test]
    fn test_gateway_config_rejects_bad_url() {
        let mut config = gateway();
        config.base_url = "api.razorpay.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_defaults_are_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
        assert!(ReconcileConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_connections_cannot_exceed_max() {
        let config = DatabaseConfig {
            url: "postgres://localhost/studio".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_err());
    }
}
