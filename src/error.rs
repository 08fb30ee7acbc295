//! Error types for Quotagate.

use thiserror::Error;

/// Main error type for Quotagate operations.
///
/// Every variant is a setup-time failure. Request evaluation never returns
/// an error; an exhausted quota is reported as a `Decision::Block`.
#[derive(Error, Debug)]
pub enum QuotaGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule was registered with a zero-length window
    #[error("Invalid window for rule {rule}: window must be greater than zero")]
    InvalidWindow {
        /// Name or index of the offending rule
        rule: String,
    },

    /// Purge thresholds must both be non-zero
    #[error("Invalid purge threshold: {0}")]
    InvalidPurgeThreshold(String),

    /// Errors raised while layering configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotaGateError>;
