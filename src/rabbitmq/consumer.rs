use std::future::Future;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::broker_config::RetryPolicy;
use super::channel_manager::ChannelManager;
use super::client::ClientInner;
use super::errors::{RabbitMQError, Result};
use super::pump;
use super::topology::ConsumerSpec;

impl ClientInner {
    /// Declares and binds the consumer's queue, opens its delivery stream and
    /// starts its pump under `token`.
    pub(crate) async fn setup_consumer(
        &self,
        channel: &ChannelManager,
        token: &CancellationToken,
        spec: &ConsumerSpec,
    ) -> Result<()> {
        let _guard = self.consume_guard.lock().await;
        let policy = self.config.setup_retry;

        let queue = retry(policy, token, "Declare queue", || {
            info!(queue = %spec.queue.name, "Declare queue");
            channel.declare_queue(&spec.queue)
        })
        .await?;

        retry(policy, token, "QueueBind", || {
            info!(
                queue = %queue,
                exchange = %spec.exchange,
                topic = %spec.routing_key,
                "Bind queue"
            );
            channel.bind_queue(&queue, &spec.routing_key, &spec.exchange, &spec.queue)
        })
        .await?;

        info!(queue = %queue, "Consume with queue");
        let deliveries = channel.consume(&queue, &spec.consume).await.map_err(|err| {
            error!(queue = %queue, "Consume error: {}", err);
            match err {
                RabbitMQError::ConsumeError(_) => err,
                other => RabbitMQError::ConsumeError(format!("queue '{}': {}", queue, other)),
            }
        })?;

        pump::start(
            &self.pumps,
            token.clone(),
            queue,
            deliveries,
            spec.handler.clone(),
        );
        Ok(())
    }
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping
/// `policy.interval` between failures. Gives up early with
/// [`RabbitMQError::Closed`] if `token` is cancelled while waiting.
pub(crate) async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    token: &CancellationToken,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            error!(attempt, "{} failed after {} attempts: {}", what, max_attempts, err);
            return Err(err);
        }
        warn!(
            attempt,
            "{} error: {}. Retrying in {:?}...", what, err, policy.interval
        );

        tokio::select! {
            _ = token.cancelled() => return Err(RabbitMQError::Closed),
            _ = sleep(policy.interval) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let value = retry(policy(), &CancellationToken::new(), "Declare queue", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                Err(RabbitMQError::ChannelError("busy".into()))
            } else {
                Ok("orders-created-q")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "orders-created-q");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let err = retry(policy(), &CancellationToken::new(), "QueueBind", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RabbitMQError::BindError {
                queue: "q".into(),
                exchange: "orders".into(),
                reason: "not found".into(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RabbitMQError::BindError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_when_cancelled() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let canceller = token.clone();

        let err = retry(policy(), &token, "Declare queue", || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                canceller.cancel();
            }
            async { Err::<(), _>(RabbitMQError::ChannelError("busy".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RabbitMQError::Closed));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
