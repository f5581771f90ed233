// src/rabbitmq/amqp_client.rs
//! lapin-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::{
    acker::Acker,
    options::*,
    tcp::{HandshakeResult, RustlsConnector, TcpStream},
    uri::{AMQPScheme, AMQPUri},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::broker_config::BrokerConfig;
use super::delivery::{Acknowledge, Delivery};
use super::errors::{RabbitMQError, Result};
use super::options::{ConsumeOptions, ExchangeOptions, ExchangeType, QueueOptions};
use super::tls;
use super::transport::{DeliveryStream, OpenedSession, Session, Transport};

const CONTENT_TYPE: &str = "text/plain";
const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Default, Clone, Copy)]
pub struct LapinTransport;

fn connection_properties(config: &BrokerConfig) -> ConnectionProperties {
    let properties = ConnectionProperties::default();
    match &config.connection_name {
        Some(name) => properties.with_connection_name(name.clone().into()),
        None => properties,
    }
}

fn exchange_kind(kind: &ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Headers => ExchangeKind::Headers,
        ExchangeType::Custom(kind) => ExchangeKind::Custom(kind.clone()),
    }
}

/// Blocking TCP connect plus rustls handshake, run by lapin on its blocking pool.
fn dial_tls(uri: &AMQPUri, connector: &RustlsConnector) -> HandshakeResult {
    let host = uri.authority.host.as_str();
    let address = (host, uri.authority.port);
    let stream = match uri.query.connection_timeout {
        Some(millis) => TcpStream::connect_timeout(address, Duration::from_millis(millis)),
        None => TcpStream::connect(address),
    }?;
    let stream = match uri.scheme {
        AMQPScheme::AMQP => stream,
        AMQPScheme::AMQPS => stream.into_rustls(connector, host)?,
    };
    stream.set_nonblocking(true)?;
    Ok(stream)
}

#[async_trait]
impl Transport for LapinTransport {
    async fn open(&self, config: &BrokerConfig) -> Result<OpenedSession> {
        let connector = tls::resolve(config.tls.as_ref())?.connector()?;
        let properties = connection_properties(config);

        let connection = match connector {
            None => Connection::connect(&config.url, properties).await,
            Some(connector) => {
                let uri: AMQPUri = config.url.parse().map_err(|e: String| {
                    RabbitMQError::ConnectionError(format!("Invalid AMQP URL: {}", e))
                })?;
                if uri.scheme == AMQPScheme::AMQP {
                    warn!("TLS material is ignored for an amqp:// URL; use amqps://");
                }
                Connection::connector(
                    uri,
                    Box::new(move |uri: &AMQPUri| dial_tls(uri, &connector)),
                    properties,
                )
                .await
            }
        }
        .map_err(|e| RabbitMQError::ConnectionError(format!("Failed to connect: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel open failed").await {
                    debug!("Failed to close connection after channel error: {}", close_err);
                }
                return Err(RabbitMQError::ChannelError(format!(
                    "Failed to create channel: {}",
                    e
                )));
            }
        };

        let (closed_tx, closed_rx) = oneshot::channel();
        let mut closed_tx = Some(closed_tx);
        connection.on_error(move |err| {
            error!("RabbitMQ connection error: {}", err);
            if let Some(tx) = closed_tx.take() {
                let _ = tx.send(err.to_string());
            }
        });

        info!(channel_id = channel.id(), "Connected to RabbitMQ");
        Ok(OpenedSession {
            session: Box::new(LapinSession {
                connection,
                channel,
            }),
            closed: closed_rx,
        })
    }
}

struct LapinSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Session for LapinSession {
    async fn declare_exchange(&mut self, name: &str, options: &ExchangeOptions) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                exchange_kind(&options.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    internal: options.internal,
                    nowait: options.no_wait,
                },
                options.arguments.clone(),
            )
            .await
            .map_err(|e| RabbitMQError::ExchangeDeclareError {
                exchange: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn declare_queue(&mut self, options: &QueueOptions) -> Result<String> {
        let queue = self
            .channel
            .queue_declare(
                &options.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: options.no_wait,
                },
                options.arguments.clone(),
            )
            .await
            .map_err(|e| RabbitMQError::QueueDeclareError {
                queue: options.name.clone(),
                reason: e.to_string(),
            })?;

        // no-wait declares get no declare-ok, so there is no generated name to read
        if options.no_wait || queue.name().as_str().is_empty() {
            return Ok(options.name.clone());
        }
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        options: &QueueOptions,
    ) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions {
                    nowait: options.bind_no_wait,
                },
                options.bind_arguments.clone(),
            )
            .await
            .map_err(|e| RabbitMQError::BindError {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                reason: e.to_string(),
            })
    }

    async fn consume(&mut self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream> {
        let consumer_tag = format!("consumer-{}", &Uuid::new_v4().to_string()[..8]);
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.auto_ack,
                    exclusive: options.exclusive,
                    nowait: options.no_wait,
                },
                options.arguments.clone(),
            )
            .await
            .map_err(|e| RabbitMQError::ConsumeError(format!("queue '{}': {}", queue, e)))?;

        debug!(queue, consumer_tag = %consumer_tag, "Consumer registered");
        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(into_delivery)
                    .map_err(|e| RabbitMQError::ConsumeError(e.to_string()))
            })
            .boxed())
    }

    async fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type(CONTENT_TYPE.into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))
    }

    async fn close_channel(&mut self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "Closing channel")
            .await
            .map_err(|e| RabbitMQError::ChannelError(e.to_string()))
    }

    async fn close_connection(&mut self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "Closing connection")
            .await
            .map_err(|e| RabbitMQError::ConnectionError(e.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let content_type = delivery
        .properties
        .content_type()
        .as_ref()
        .map(|ct| ct.as_str().to_string());

    Delivery::new(
        delivery.delivery_tag,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.data,
        Box::new(LapinAcker(delivery.acker)),
    )
    .with_redelivered(delivery.redelivered)
    .with_content_type(content_type)
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }
}
