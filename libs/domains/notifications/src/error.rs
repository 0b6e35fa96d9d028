//! Error types for the notifications domain.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Persistence backend failure (read, write, delete or listing).
    #[error("Store error: {0}")]
    Store(String),

    /// No accumulator record exists under the given key.
    #[error("No pending events stored under '{0}'")]
    RecordNotFound(String),

    /// Event-history lookup failed.
    #[error("Event history error: {0}")]
    History(String),

    /// Settings service failure.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Identity/storage gateway failure.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Transport channel failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Payload or record (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Interval value that is not one of instant/daily/weekly.
    #[error("Unknown interval: {0}")]
    UnknownInterval(String),

    /// A grouped digest ended up without a single renderable event.
    #[error("No renderable events in digest for user {0}")]
    EmptyDigest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for NotificationError {
    fn from(err: redis::RedisError) -> Self {
        NotificationError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Serialization(err.to_string())
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::Channel(err.to_string())
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::Channel(format!("Failed to build email message: {}", err))
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotificationError::Channel(format!("Invalid address: {}", err))
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}
