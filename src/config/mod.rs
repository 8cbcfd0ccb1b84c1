//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables use the `REALTIME_HUB` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use realtime_hub::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod admin;
mod auth;
mod error;
mod realtime;
mod redis;
mod server;

pub use admin::AdminConfig;
pub use auth::AuthConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::RealtimeConfig;
pub use self::redis::RedisConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults; load with [`AppConfig::load()`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis configuration (cross-instance fanout)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Session token validation
    #[serde(default)]
    pub auth: AuthConfig,

    /// Hub and connection tuning
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Admin API protection
    #[serde(default)]
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `REALTIME_HUB` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `REALTIME_HUB__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `REALTIME_HUB__REALTIME__MAILBOX_CAPACITY=512` -> `realtime.mailbox_capacity = 512`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("REALTIME_HUB")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.redis.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.realtime.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global; tests touching them run one at a time.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "REALTIME_HUB__SERVER__PORT",
        "REALTIME_HUB__SERVER__ENVIRONMENT",
        "REALTIME_HUB__REDIS__URL",
        "REALTIME_HUB__AUTH__JWT_SECRET",
        "REALTIME_HUB__AUTH__ALLOW_IDENTITY_FALLBACK",
        "REALTIME_HUB__REALTIME__MAILBOX_CAPACITY",
        "REALTIME_HUB__REALTIME__STALE_AFTER_SECS",
        "REALTIME_HUB__ADMIN__API_KEY",
    ];

    fn set_minimal_env() {
        env::set_var("REALTIME_HUB__AUTH__JWT_SECRET", "test-secret-value");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn load_with(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        set_minimal_env();
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[("REALTIME_HUB__REDIS__URL", "redis://localhost:6379")]).unwrap();

        assert_eq!(config.redis.url(), Some("redis://localhost:6379"));
        assert_eq!(
            config.auth.jwt_secret().map(|s| s.expose_secret().as_str()),
            Some("test-secret-value")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_without_optional_sections() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[]).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.redis.url(), None);
        assert_eq!(config.realtime.mailbox_capacity, 256);
        assert!(config.admin.api_key().is_none());
    }

    #[test]
    fn test_nested_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[
            ("REALTIME_HUB__SERVER__PORT", "3000"),
            ("REALTIME_HUB__REALTIME__MAILBOX_CAPACITY", "16"),
            ("REALTIME_HUB__ADMIN__API_KEY", "k"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.realtime.mailbox_capacity, 16);
        assert!(config.admin.api_key().is_some());
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[("REALTIME_HUB__SERVER__ENVIRONMENT", "production")]).unwrap();
        assert!(config.is_production());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_realtime_errors() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[("REALTIME_HUB__REALTIME__STALE_AFTER_SECS", "10")]).unwrap();
        assert_eq!(config.validate(), Err(ValidationError::StaleThresholdTooShort));
    }

    #[test]
    fn test_production_rejects_identity_fallback() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = load_with(&[
            ("REALTIME_HUB__SERVER__ENVIRONMENT", "production"),
            ("REALTIME_HUB__AUTH__ALLOW_IDENTITY_FALLBACK", "true"),
        ])
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ValidationError::IdentityFallbackInProduction)
        );
    }
}
