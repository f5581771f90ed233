use tracing::debug;

use super::client::{lock, RabbitMQClient};
use super::errors::{RabbitMQError, Result};
use super::state::ConnectionState;

impl RabbitMQClient {
    /// Publishes `body` as `text/plain` on the live session.
    ///
    /// No buffering and no retry: outside the `Connected` state, or if the
    /// session dies mid-call, the error comes straight back to the caller.
    ///
    /// Only a connection-level failure triggers a reconnect. If the broker
    /// closes just the channel (say, a publish to a missing exchange), the
    /// client stays `Connected` and later publishes fail until the connection
    /// itself drops.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl AsRef<[u8]>,
    ) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Closing | ConnectionState::Closed => return Err(RabbitMQError::Closed),
            other => return Err(RabbitMQError::NotConnected(other.to_string())),
        }

        let channel = lock(&self.inner.current)
            .as_ref()
            .map(|live| live.channel.clone())
            .ok_or_else(|| RabbitMQError::NotConnected("no live session".to_string()))?;

        channel.publish(exchange, routing_key, body.as_ref()).await?;
        debug!(exchange, routing_key, "Published message");
        Ok(())
    }
}
