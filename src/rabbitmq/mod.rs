// src/rabbitmq/mod.rs
// Reconnecting RabbitMQ client built on lapin

pub mod errors;
pub mod options;
pub mod tls;
pub mod transport;

mod amqp_client;
mod broker_config;
mod channel_manager;
mod client;
mod connection;
mod consumer;
mod delivery;
mod publisher;
mod pump;
mod shutdown;
mod state;
mod topology;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::LapinTransport;
pub use broker_config::{BrokerConfig, RetryPolicy};
pub use client::RabbitMQClient;
pub use delivery::{Acknowledge, Delivery, DeliveryHandler};
pub use errors::{RabbitMQError, Result};
pub use options::{ConsumeOptions, ExchangeOptions, ExchangeType, QueueOptions};
pub use state::ConnectionState;
pub use tls::TlsMaterial;
pub use topology::{ConsumerSpec, ProducerSpec, Topology};
pub use transport::{DeliveryStream, OpenedSession, Session, Transport};
