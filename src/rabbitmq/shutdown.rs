use tracing::{debug, error, info, warn};

use super::client::{lock, RabbitMQClient};
use super::state::ConnectionState;

impl RabbitMQClient {
    /// Stops every consumer, then closes the channel and the connection.
    ///
    /// Waits for each running handler call to return; there is no timeout.
    /// Close failures are logged, never returned. Also stops a reconnect loop
    /// in progress. Later calls wait for the first one to finish.
    ///
    /// Awaiting this from inside a delivery handler never completes.
    pub async fn close(&self) {
        let first = self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        if !first {
            debug!("close already requested");
            self.wait_for_state(ConnectionState::Closed).await;
            return;
        }

        info!("Closing RabbitMQ connection...");
        self.inner.shutdown.cancel();

        // let an in-flight connect attempt finish before tearing down
        drop(self.inner.reconnect_guard.lock().await);

        let supervisor = lock(&self.inner.supervisor).take();
        if let Some(supervisor) = supervisor {
            if let Err(err) = supervisor.await {
                warn!("Disconnect watcher ended abnormally: {}", err);
            }
        }

        self.inner.pumps.close();
        self.inner.pumps.wait().await;
        info!("All consumers stopped");

        let live = lock(&self.inner.current).take();
        if let Some(live) = live {
            match live.channel.close().await {
                Some(outcome) => {
                    if let Err(err) = outcome.channel {
                        error!("Failed to close channel: {}", err);
                    }
                    if let Err(err) = outcome.connection {
                        error!("Failed to close connection: {}", err);
                    }
                }
                None => warn!("session already ended before close"),
            }
            if let Err(err) = live.task.await {
                warn!("Channel manager ended abnormally: {}", err);
            }
        }

        self.inner.state.send_replace(ConnectionState::Closed);
        info!("RabbitMQ client closed");
    }
}
