//! Error type for the bridge runtime.

use thiserror::Error;

use homiebridge_core::TopicError;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error type for projector, worker and transport operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bridge configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Topic did not match the Homie grammar
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Projection store error
    #[error("Storage error: {0}")]
    Storage(#[from] homiebridge_storage::Error),

    /// Other error
    #[error("Bridge error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<homiebridge_core::Error> for BridgeError {
    fn from(e: homiebridge_core::Error) -> Self {
        match e {
            homiebridge_core::Error::Config(msg) => BridgeError::Configuration(msg),
            homiebridge_core::Error::Topic(e) => BridgeError::Topic(e),
            other => BridgeError::Other(anyhow::Error::new(other)),
        }
    }
}
