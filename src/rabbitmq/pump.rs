//! Per-consumer bridge from a delivery stream to the user handler.
//!
//! A forwarder task reads the stream and hands each delivery to a dispatcher
//! task, which calls the handler one delivery at a time. Both stop when the
//! session token is cancelled; the forwarder also stops when the stream ends.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::delivery::{Delivery, DeliveryHandler};
use super::transport::DeliveryStream;

// tokio has no rendezvous channel; one slot is the closest handoff.
const HANDOFF_CAPACITY: usize = 1;

pub(crate) fn start(
    tracker: &TaskTracker,
    token: CancellationToken,
    queue: String,
    deliveries: DeliveryStream,
    handler: Arc<dyn DeliveryHandler>,
) {
    let (handoff_tx, handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);
    tracker.spawn(forward(token.clone(), queue.clone(), deliveries, handoff_tx));
    tracker.spawn(dispatch(token, queue, handoff_rx, handler));
}

async fn forward(
    token: CancellationToken,
    queue: String,
    mut deliveries: DeliveryStream,
    handoff: mpsc::Sender<Delivery>,
) {
    info!(queue = %queue, "Receive messages from queue");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(queue = %queue, "Delivery stream failed: {}", err);
                    break;
                }
                None => {
                    debug!(queue = %queue, "Delivery stream ended");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = handoff.send(delivery) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    info!(queue = %queue, "Consume from queue done");
}

async fn dispatch(
    token: CancellationToken,
    queue: String,
    mut handoff: mpsc::Receiver<Delivery>,
    handler: Arc<dyn DeliveryHandler>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = handoff.recv() => match next {
                Some(delivery) => handler.handle(delivery).await,
                None => break,
            },
        }
    }

    debug!(queue = %queue, "Dispatcher stopped");
}
