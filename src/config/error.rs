//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(&'static str),

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("Stale threshold must exceed the heartbeat interval")]
    StaleThresholdTooShort,

    #[error("Identity fallback must be disabled in production")]
    IdentityFallbackInProduction,

    #[error("No identity source: set a JWT secret or enable identity fallback")]
    NoIdentitySource,
}
