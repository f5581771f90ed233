//! Single owner of a session's channel.
//!
//! Every protocol operation is queued to one task and executed in arrival
//! order, so declare, bind, consume and publish never overlap on the wire.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::errors::{RabbitMQError, Result};
use super::options::{ConsumeOptions, ExchangeOptions, QueueOptions};
use super::transport::{DeliveryStream, Session};

const COMMAND_QUEUE_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    DeclareExchange {
        name: String,
        options: ExchangeOptions,
        reply: Reply<()>,
    },
    DeclareQueue {
        options: QueueOptions,
        reply: Reply<String>,
    },
    BindQueue {
        queue: String,
        routing_key: String,
        exchange: String,
        options: QueueOptions,
        reply: Reply<()>,
    },
    Consume {
        queue: String,
        options: ConsumeOptions,
        reply: Reply<DeliveryStream>,
    },
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
        reply: Reply<()>,
    },
    Close {
        reply: oneshot::Sender<CloseOutcome>,
    },
}

/// Results of closing the channel and then the connection.
#[derive(Debug)]
pub struct CloseOutcome {
    pub channel: Result<()>,
    pub connection: Result<()>,
}

/// Handle to the task that owns one session.
///
/// Cloning is cheap; all clones feed the same queue. The task stops after a
/// close request or once every handle is dropped.
#[derive(Clone)]
pub struct ChannelManager {
    session_id: u64,
    commands: mpsc::Sender<Command>,
}

impl ChannelManager {
    pub fn spawn(session_id: u64, session: Box<dyn Session>) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let handle = tokio::spawn(run(session_id, session, rx));
        (
            Self {
                session_id,
                commands,
            },
            handle,
        )
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| RabbitMQError::NotConnected("session has ended".to_string()))?;
        response.await.map_err(|_| {
            RabbitMQError::ChannelError("session ended before the operation completed".to_string())
        })?
    }

    pub async fn declare_exchange(&self, name: &str, options: &ExchangeOptions) -> Result<()> {
        self.request(|reply| Command::DeclareExchange {
            name: name.to_string(),
            options: options.clone(),
            reply,
        })
        .await
    }

    pub async fn declare_queue(&self, options: &QueueOptions) -> Result<String> {
        self.request(|reply| Command::DeclareQueue {
            options: options.clone(),
            reply,
        })
        .await
    }

    pub async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        options: &QueueOptions,
    ) -> Result<()> {
        self.request(|reply| Command::BindQueue {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            exchange: exchange.to_string(),
            options: options.clone(),
            reply,
        })
        .await
    }

    pub async fn consume(&self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream> {
        self.request(|reply| Command::Consume {
            queue: queue.to_string(),
            options: options.clone(),
            reply,
        })
        .await
    }

    pub async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        self.request(|reply| Command::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            reply,
        })
        .await
    }

    /// Closes the channel, then the connection. Returns `None` if the task is
    /// already gone.
    pub async fn close(&self) -> Option<CloseOutcome> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Close { reply }).await.ok()?;
        response.await.ok()
    }
}

async fn run(session_id: u64, mut session: Box<dyn Session>, mut rx: mpsc::Receiver<Command>) {
    debug!(session_id, "Channel manager started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::DeclareExchange {
                name,
                options,
                reply,
            } => {
                let _ = reply.send(session.declare_exchange(&name, &options).await);
            }
            Command::DeclareQueue { options, reply } => {
                let _ = reply.send(session.declare_queue(&options).await);
            }
            Command::BindQueue {
                queue,
                routing_key,
                exchange,
                options,
                reply,
            } => {
                let result = session
                    .bind_queue(&queue, &routing_key, &exchange, &options)
                    .await;
                let _ = reply.send(result);
            }
            Command::Consume {
                queue,
                options,
                reply,
            } => {
                let _ = reply.send(session.consume(&queue, &options).await);
            }
            Command::Publish {
                exchange,
                routing_key,
                body,
                reply,
            } => {
                let _ = reply.send(session.publish(&exchange, &routing_key, &body).await);
            }
            Command::Close { reply } => {
                info!(session_id, "Closing channel and connection");
                let channel = session.close_channel().await;
                let connection = session.close_connection().await;
                let _ = reply.send(CloseOutcome {
                    channel,
                    connection,
                });
                break;
            }
        }
    }

    debug!(session_id, "Channel manager stopped");
}
