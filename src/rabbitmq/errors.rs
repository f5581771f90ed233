// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("TLS configuration error: {0}")]
    TlsError(String),

    #[error("declare exchange '{exchange}' error: {reason}")]
    ExchangeDeclareError { exchange: String, reason: String },

    #[error("declare queue '{queue}' error: {reason}")]
    QueueDeclareError { queue: String, reason: String },

    #[error("bind queue '{queue}' to exchange '{exchange}' error: {reason}")]
    BindError {
        queue: String,
        exchange: String,
        reason: String,
    },

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(String),

    #[error("client is not connected (state: {0})")]
    NotConnected(String),

    #[error("client has been closed")]
    Closed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

// Lapin errors without a better call-site mapping land on the channel, since
// every operation this crate issues runs over the single channel.
impl From<LapinError> for RabbitMQError {
    fn from(error: LapinError) -> Self {
        match error {
            LapinError::InvalidConnectionState(_) | LapinError::IOError(_) => {
                RabbitMQError::ConnectionError(error.to_string())
            }
            _ => RabbitMQError::ChannelError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_queue() {
        let err = RabbitMQError::QueueDeclareError {
            queue: "orders-created-q".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "declare queue 'orders-created-q' error: boom"
        );
    }
}
