use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use super::broker_config::BrokerConfig;
use super::delivery::Delivery;
use super::errors::Result;
use super::options::{ConsumeOptions, ExchangeOptions, QueueOptions};

/// Deliveries for one `basic.consume`. Ends when the channel goes away.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// A freshly dialed connection with its single operation channel.
pub struct OpenedSession {
    pub session: Box<dyn Session>,
    /// Fires once with the broker's reason if the connection dies. A
    /// deliberate close never fires it.
    pub closed: oneshot::Receiver<String>,
}

/// Dials the broker. One call yields one connection and one channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, config: &BrokerConfig) -> Result<OpenedSession>;
}

/// Protocol operations on an open channel.
///
/// Takes `&mut self`: callers must not issue two operations at once.
#[async_trait]
pub trait Session: Send + 'static {
    async fn declare_exchange(&mut self, name: &str, options: &ExchangeOptions) -> Result<()>;

    /// Returns the queue's actual name, which differs from the requested one
    /// for server-named queues.
    async fn declare_queue(&mut self, options: &QueueOptions) -> Result<String>;

    async fn bind_queue(
        &mut self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        options: &QueueOptions,
    ) -> Result<()>;

    async fn consume(&mut self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream>;

    async fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()>;

    async fn close_channel(&mut self) -> Result<()>;

    async fn close_connection(&mut self) -> Result<()>;
}
