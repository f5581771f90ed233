//! Connect/reconnect state machine.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel_manager::ChannelManager;
use super::client::{lock, ClientInner, LiveSession, RabbitMQClient};
use super::errors::{RabbitMQError, Result};
use super::state::ConnectionState;

/// What the disconnect watcher needs from a successful connect.
pub(crate) struct SessionWatch {
    session_id: u64,
    closed: oneshot::Receiver<String>,
    token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Reconnect,
}

impl RabbitMQClient {
    /// Opens the connection, declares every producer exchange and starts every
    /// consumer, then watches the connection and reconnects when it drops.
    ///
    /// Errors from this first attempt are returned; later failures are retried
    /// internally every `reconnect_interval`, forever. Calling `connect` on a
    /// client that is already live does nothing.
    pub async fn connect(&self) -> Result<()> {
        let guard = self.inner.reconnect_guard.lock().await;

        match self.state() {
            ConnectionState::Closing | ConnectionState::Closed => return Err(RabbitMQError::Closed),
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                warn!("connect called on a live client; ignoring");
                return Ok(());
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        let watch = self.inner.establish(Attempt::Initial).await?;

        // stored before releasing the guard so close() always finds it
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.watch_disconnect(watch));
        *lock(&self.inner.supervisor) = Some(handle);
        drop(guard);
        Ok(())
    }
}

impl ClientInner {
    /// One connect attempt. The caller holds `reconnect_guard`.
    async fn establish(&self, attempt: Attempt) -> Result<SessionWatch> {
        if self.shutdown.is_cancelled() {
            return Err(RabbitMQError::Closed);
        }
        self.set_state(ConnectionState::Connecting);

        let result = self.open_session().await;
        match &result {
            Ok(_) => {
                self.set_state(ConnectionState::Connected);
            }
            Err(_) => {
                self.set_state(match attempt {
                    Attempt::Initial => ConnectionState::Disconnected,
                    Attempt::Reconnect => ConnectionState::Reconnecting,
                });
            }
        }
        result
    }

    async fn open_session(&self) -> Result<SessionWatch> {
        info!(url = %redact(&self.config.url), "Connecting to RabbitMQ");
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RabbitMQError::Closed),
            opened = self.transport.open(&self.config) => opened?,
        };

        let session_id = self.next_session_id();
        let (channel, task) = ChannelManager::spawn(session_id, opened.session);
        let session = LiveSession {
            channel,
            token: self.shutdown.child_token(),
            task,
        };

        let declared = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RabbitMQError::Closed),
            declared = self.declare_topology(&session) => declared,
        };
        match declared {
            Ok(()) => {}
            Err(RabbitMQError::Closed) => {
                // the channel may be stuck; close() must not wait on it
                session.token.cancel();
                tokio::spawn(abandon(session));
                return Err(RabbitMQError::Closed);
            }
            Err(err) => {
                error!(session_id, "Connect failed: {}", err);
                abandon(session).await;
                return Err(err);
            }
        }

        if self.shutdown.is_cancelled() {
            abandon(session).await;
            return Err(RabbitMQError::Closed);
        }

        let watch = SessionWatch {
            session_id,
            closed: opened.closed,
            token: session.token.clone(),
        };
        if let Some(previous) = lock(&self.current).replace(session) {
            previous.token.cancel();
        }
        Ok(watch)
    }

    async fn declare_topology(&self, session: &LiveSession) -> Result<()> {
        let topology = self.topology_snapshot();

        for producer in topology.producers() {
            info!(exchange = %producer.exchange, kind = %producer.options.kind, "Declare exchange");
            session
                .channel
                .declare_exchange(&producer.exchange, &producer.options)
                .await?;
        }

        for consumer in topology.consumers() {
            self.setup_consumer(&session.channel, &session.token, consumer)
                .await?;
        }
        Ok(())
    }

    /// Disconnect watcher: waits for the live session to die, then reconnects.
    async fn watch_disconnect(self: Arc<Self>, mut watch: SessionWatch) {
        loop {
            let reason = tokio::select! {
                _ = watch.token.cancelled() => break,
                reason = &mut watch.closed => match reason {
                    Ok(reason) => reason,
                    // closed without an error: nothing to recover
                    Err(_) => break,
                },
            };

            warn!(session_id = watch.session_id, %reason, "Connection closed");
            self.retire(watch.session_id);
            self.set_state(ConnectionState::Reconnecting);

            match self.reconnect().await {
                Some(next) => watch = next,
                None => break,
            }
        }
        debug!("Disconnect watcher stopped");
    }

    fn retire(&self, session_id: u64) {
        let mut current = lock(&self.current);
        if current
            .as_ref()
            .is_some_and(|live| live.channel.session_id() == session_id)
        {
            if let Some(live) = current.take() {
                live.token.cancel();
            }
        }
    }

    /// Retries until a connect succeeds or the client is closed.
    async fn reconnect(&self) -> Option<SessionWatch> {
        let interval = self.config.reconnect_interval;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            info!(attempt, "Attempting to reconnect...");

            let result = {
                let _guard = self.reconnect_guard.lock().await;
                self.establish(Attempt::Reconnect).await
            };
            match result {
                Ok(watch) => {
                    info!(attempt, "Reconnected to RabbitMQ");
                    return Some(watch);
                }
                Err(RabbitMQError::Closed) => return None,
                Err(err) => {
                    warn!(
                        attempt,
                        "Failed to reconnect: {}. Retrying in {:?}...", err, interval
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = sleep(interval) => {}
            }
        }
    }
}

/// Tears down a session that never went live.
async fn abandon(session: LiveSession) {
    session.token.cancel();
    if let Some(outcome) = session.channel.close().await {
        if let Err(err) = outcome.channel {
            debug!("Failed to close channel: {}", err);
        }
        if let Err(err) = outcome.connection {
            debug!("Failed to close connection: {}", err);
        }
    }
    let _ = session.task.await;
}

/// Strips the password from an AMQP URL for logging.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
