use std::fmt;
use std::str::FromStr;

use lapin::types::FieldTable;

use super::errors::RabbitMQError;

/// Exchange routing algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    /// Plugin-provided exchange types, e.g. `x-delayed-message`.
    Custom(String),
}

impl ExchangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
            ExchangeType::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = RabbitMQError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(RabbitMQError::ConfigError(
                "exchange type cannot be empty".to_string(),
            )),
            "direct" => Ok(ExchangeType::Direct),
            "fanout" => Ok(ExchangeType::Fanout),
            "topic" => Ok(ExchangeType::Topic),
            "headers" => Ok(ExchangeType::Headers),
            other => Ok(ExchangeType::Custom(other.to_string())),
        }
    }
}

/// Flags for an exchange declared by a producer registration.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOptions {
    pub kind: ExchangeType,
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once the last queue is unbound.
    pub auto_delete: bool,
    /// Clients cannot publish to it directly.
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ExchangeOptions {
    pub fn new(kind: ExchangeType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }
}

/// Queue declaration and binding flags for a consumer registration.
///
/// An empty `name` asks the broker to generate one; the generated name is
/// used for the bind and consume steps that follow.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,

    pub bind_no_wait: bool,
    pub bind_arguments: FieldTable,
}

impl QueueOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

/// Flags for `basic.consume`.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// The broker considers a message acknowledged as soon as it is sent.
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl ConsumeOptions {
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}
