// src/rabbitmq/errors.rs

use serde_json::Error as SerdeError;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Prefix used when a publish attempt is abandoned.
pub const PUBLISH_ERROR: &str = "Failed to publish data";

/// Prefix used when a subscription could not be established.
pub const CONSUME_ERROR: &str = "Failed to consume data";

#[derive(Debug, Error)]
pub enum RabbitMQError {
    /// A required connection parameter is missing. Never retried.
    #[error("RabbitMQ configuration error: {0}")]
    Configuration(String),

    /// TLS or network failure while connecting or opening a channel.
    #[error("RabbitMQ transport error: {0}")]
    Transport(String),

    /// Exchange, queue or binding declaration rejected by the broker.
    #[error("RabbitMQ topology error: {0}")]
    Topology(String),

    #[error("RabbitMQ publish error: {0}")]
    Publish(String),

    #[error("RabbitMQ subscribe error: {0}")]
    Subscribe(String),

    #[error("Message serialization error: {0}")]
    Serialization(#[from] SerdeError),

    #[error("Message deserialization error: {0}")]
    Deserialization(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    Ack(String),

    #[error("Message handler fault: {0}")]
    HandlerFault(String),

    #[error("Connection timeout: {0}")]
    Timeout(String),
}

impl RabbitMQError {
    /// Configuration problems are fatal to the attempted operation.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RabbitMQError::Configuration(_))
    }

    /// Errors raised before or while reaching the broker.
    pub fn is_transport(&self) -> bool {
        matches!(self, RabbitMQError::Transport(_) | RabbitMQError::Timeout(_))
    }
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::Timeout("Connection timed out".to_string())
    }
}
