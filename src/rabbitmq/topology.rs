use std::fmt;
use std::sync::Arc;

use super::delivery::DeliveryHandler;
use super::errors::{RabbitMQError, Result};
use super::options::{ConsumeOptions, ExchangeOptions, QueueOptions};

/// An exchange this client publishes to; declared on every connect.
#[derive(Debug, Clone)]
pub struct ProducerSpec {
    pub exchange: String,
    pub options: ExchangeOptions,
}

/// A queue bound to an exchange, consumed by one handler.
#[derive(Clone)]
pub struct ConsumerSpec {
    pub exchange: String,
    pub routing_key: String,
    pub handler: Arc<dyn DeliveryHandler>,
    pub queue: QueueOptions,
    pub consume: ConsumeOptions,
}

impl fmt::Debug for ConsumerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSpec")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("queue", &self.queue)
            .field("consume", &self.consume)
            .finish_non_exhaustive()
    }
}

/// Registered producers and consumers, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    producers: Vec<ProducerSpec>,
    consumers: Vec<ConsumerSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exchange to declare. Re-registering a name replaces the
    /// earlier options but keeps its position.
    pub fn add_producer(&mut self, exchange: &str, options: ExchangeOptions) -> Result<()> {
        if exchange.is_empty() {
            return Err(RabbitMQError::ConfigError(
                "producer exchange name cannot be empty".to_string(),
            ));
        }

        match self.producers.iter_mut().find(|p| p.exchange == exchange) {
            Some(existing) => existing.options = options,
            None => self.producers.push(ProducerSpec {
                exchange: exchange.to_string(),
                options,
            }),
        }
        Ok(())
    }

    pub fn add_consumer(
        &mut self,
        exchange: &str,
        routing_key: &str,
        handler: Arc<dyn DeliveryHandler>,
        queue: QueueOptions,
        consume: ConsumeOptions,
    ) -> Result<()> {
        if exchange.is_empty() {
            return Err(RabbitMQError::ConfigError(format!(
                "consumer of queue '{}' must name an exchange",
                queue.name
            )));
        }

        self.consumers.push(ConsumerSpec {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            handler,
            queue,
            consume,
        });
        Ok(())
    }

    pub fn producers(&self) -> &[ProducerSpec] {
        &self.producers
    }

    pub fn consumers(&self) -> &[ConsumerSpec] {
        &self.consumers
    }
}
