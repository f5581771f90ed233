use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rabbit_reconnect::config::{self, DemoSettings, CONFIG_FILE_NAME};
use rabbit_reconnect::env::Config;
use rabbit_reconnect::rabbitmq::{
    BrokerConfig, ConsumeOptions, Delivery, ExchangeOptions, ExchangeType, QueueOptions,
    RabbitMQClient, RabbitMQError,
};

const USAGE: &str = "usage: rabbit-reconnect <produce|consume|init-config>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Produce,
    Consume,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let mode = match std::env::args().nth(1).as_deref() {
        Some("produce") => Mode::Produce,
        Some("consume") => Mode::Consume,
        Some("init-config") => return config::create_default_config_file(Path::new(CONFIG_FILE_NAME)),
        _ => return Err(anyhow!(USAGE)),
    };

    let (broker, demo) = load_settings()?;
    let client = RabbitMQClient::new(broker);
    let exchange_type: ExchangeType = demo.exchange_type.parse()?;

    match mode {
        Mode::Produce => {
            client.add_producer(&demo.exchange, ExchangeOptions::new(exchange_type).durable(true))?;
        }
        Mode::Consume => {
            // declare too, so the consumer can start before any producer
            client.add_producer(&demo.exchange, ExchangeOptions::new(exchange_type).durable(true))?;
            client.add_consumer(
                &demo.exchange,
                &demo.routing_key,
                handle_delivery,
                QueueOptions::named(&demo.queue).durable(true),
                ConsumeOptions::default(),
            )?;
        }
    }

    client.connect().await.context("initial connect failed")?;
    info!(state = %client.state(), "Connected; press Ctrl-C to stop");

    match mode {
        Mode::Produce => {
            tokio::select! {
                _ = produce(&client, &demo) => {}
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
            }
        }
        Mode::Consume => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received");
        }
    }

    client.close().await;
    Ok(())
}

/// The JSON config file wins when present; otherwise the environment.
fn load_settings() -> Result<(BrokerConfig, DemoSettings)> {
    match config::find_config_file() {
        Ok(path) => {
            info!("Using configuration from {}", path.display());
            let file = config::load_config_from(&path)?;
            Ok((file.broker_config()?, file.demo))
        }
        Err(_) => {
            let env = Config::load().context("no config file and no usable environment")?;
            Ok((env.broker_config()?, DemoSettings::default()))
        }
    }
}

async fn produce(client: &RabbitMQClient, demo: &DemoSettings) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut counter: u64 = 0;

    loop {
        ticker.tick().await;
        counter += 1;
        let body = format!("message {}", counter);

        match client.publish(&demo.exchange, &demo.routing_key, body).await {
            Ok(()) => info!(counter, "Published"),
            Err(RabbitMQError::Closed) => break,
            Err(err) => warn!(counter, "Publish failed: {}", err),
        }
    }
}

async fn handle_delivery(delivery: Delivery) {
    info!(
        tag = delivery.delivery_tag,
        routing_key = %delivery.routing_key,
        "Received: {}",
        String::from_utf8_lossy(delivery.body())
    );
    if let Err(err) = delivery.ack().await {
        error!("Failed to acknowledge message: {}", err);
    }
}
