// Requires a running RabbitMQ; set AMQP_ADDR (or .env) and run with --ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use rabbit_reconnect::env::Config;
use rabbit_reconnect::rabbitmq::{
    ConnectionState, ConsumeOptions, Delivery, ExchangeOptions, ExchangeType, QueueOptions,
    RabbitMQClient,
};

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_round_trip_against_live_broker() {
    let config = Config::load()
        .expect("AMQP_ADDR must be set")
        .broker_config()
        .unwrap();
    let client = RabbitMQClient::new(config);
    let exchange = format!("rabbit-reconnect-test-{}", uuid::Uuid::new_v4());
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .add_producer(&exchange, ExchangeOptions::new(ExchangeType::Topic).auto_delete(true))
        .unwrap();
    client
        .add_consumer(
            &exchange,
            "orders.created",
            move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    delivery.ack().await.unwrap();
                    let _ = tx.send(delivery.data);
                }
            },
            QueueOptions::named("").exclusive(true),
            ConsumeOptions::default(),
        )
        .unwrap();

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    client
        .publish(&exchange, "orders.created", "payload")
        .await
        .unwrap();
    let body = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no delivery within 2s");
    assert_eq!(body.as_deref(), Some(&b"payload"[..]));

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}
