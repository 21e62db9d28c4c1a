//! Core error types shared across HomieBridge crates.

use thiserror::Error;

use crate::topic::TopicError;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Topic did not match the Homie grammar.
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macro for building configuration errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(format!("Invalid TOML: {}", e))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_err_macro() {
        let err = config_err!("port {} out of range", 70000);
        assert_eq!(err.to_string(), "Configuration error: port 70000 out of range");
    }

    #[test]
    fn test_topic_error_conversion() {
        let err: Error = TopicError::MissingDevice("homie/".to_string()).into();
        assert!(matches!(err, Error::Topic(_)));
        assert!(err.to_string().contains("homie/"));
    }
}
