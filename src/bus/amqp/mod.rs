//! AMQP (RabbitMQ) message bus.
//!
//! Topology per consumed queue `Q`:
//! - `Q` is bound to the topic exchange and dead-letters to the retry
//!   exchange with routing key `Q`
//! - `Q.retry` holds nacked messages for the redelivery delay (message TTL),
//!   then dead-letters them back to `Q` through the default exchange
//! - `Q.parked` receives rejected (malformed) messages and is never consumed
//!
//! The attempt count of a redelivered message comes from its `x-death`
//! header. The original routing key travels in a header because
//! dead-lettering rewrites it.

use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, ExchangeKind,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{Acker, BusError, Delivery, MessageBus, Result, Subscription};
use crate::config::AmqpConfig;
use crate::utils::retry::connection_backoff;

/// Header carrying the routing key a message was first published under.
const ROUTING_KEY_HEADER: &str = "x-foodorder-routing-key";

/// Publish attempts before giving up.
const MAX_PUBLISH_RETRIES: usize = 5;

fn retry_exchange(exchange: &str) -> String {
    format!("{exchange}.retry")
}

fn retry_queue(queue: &str) -> String {
    format!("{queue}.retry")
}

fn parked_queue(queue: &str) -> String {
    format!("{queue}.parked")
}

/// RabbitMQ-backed message bus.
pub struct AmqpMessageBus {
    pool: Pool,
    config: AmqpConfig,
    redelivery_delay: Duration,
    closed: watch::Sender<bool>,
}

impl AmqpMessageBus {
    /// Connect and declare the exchanges.
    pub async fn connect(config: AmqpConfig, redelivery_delay: Duration) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let channel = channel_from(&pool).await?;
        declare_exchanges(&channel, &config.exchange).await?;

        info!(
            exchange = %config.exchange,
            url = %config.url,
            "Connected to AMQP"
        );

        let (closed, _) = watch::channel(false);
        Ok(Self {
            pool,
            config,
            redelivery_delay,
            closed,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// Consumer loop with automatic reconnection and exponential backoff.
    async fn consume_with_reconnect(
        pool: Pool,
        settings: ConsumerSettings,
        sender: mpsc::Sender<Delivery>,
        mut closed: watch::Receiver<bool>,
    ) {
        let backoff_builder = connection_backoff();
        let mut backoff_iter = backoff_builder.build();

        loop {
            if *closed.borrow() {
                break;
            }

            match setup_consumer(&pool, &settings).await {
                Ok(mut consumer) => {
                    info!(
                        queue = %settings.queue,
                        binding = %settings.binding,
                        "Consumer connected, processing messages"
                    );
                    backoff_iter = backoff_builder.build();

                    loop {
                        let next = tokio::select! {
                            _ = closed.changed() => None,
                            next = consumer.next() => Some(next),
                        };
                        match next {
                            None => return,
                            Some(Some(Ok(delivery))) => {
                                let delivery = into_delivery(delivery, &pool, &settings.queue);
                                if sender.send(delivery).await.is_err() {
                                    // Subscriber dropped; unacked messages return to the queue.
                                    return;
                                }
                            }
                            Some(Some(Err(e))) => {
                                error!(error = %e, "Consumer delivery error, will reconnect");
                                break;
                            }
                            Some(None) => break,
                        }
                    }

                    info!(queue = %settings.queue, "Consumer stream ended, reconnecting...");
                }
                Err(e) => {
                    error!(
                        error = %e,
                        queue = %settings.queue,
                        "Failed to set up consumer, retrying after backoff"
                    );
                }
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(5));
            tokio::select! {
                _ = closed.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[derive(Clone, Debug)]
struct ConsumerSettings {
    exchange: String,
    queue: String,
    binding: String,
    prefetch: u16,
    redelivery_delay: Duration,
}

async fn channel_from(pool: &Pool) -> Result<Channel> {
    let conn = pool.get().await.map_err(|e: PoolError| {
        BusError::Connection(format!("Failed to get connection from pool: {}", e))
    })?;

    conn.create_channel()
        .await
        .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
}

async fn declare_exchanges(channel: &Channel, exchange: &str) -> Result<()> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };
    channel
        .exchange_declare(exchange, ExchangeKind::Topic, durable, FieldTable::default())
        .await
        .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;
    channel
        .exchange_declare(
            &retry_exchange(exchange),
            ExchangeKind::Direct,
            durable,
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Connection(format!("Failed to declare retry exchange: {}", e)))?;
    Ok(())
}

fn long_string(value: &str) -> AMQPValue {
    AMQPValue::LongString(value.into())
}

/// Declare the exchanges and the queue trio, and bind them.
async fn declare_topology(channel: &Channel, settings: &ConsumerSettings) -> Result<()> {
    declare_exchanges(channel, &settings.exchange).await?;

    let durable = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };
    let queue = settings.queue.as_str();
    let retry = retry_queue(queue);

    let mut main_args = FieldTable::default();
    main_args.insert(
        "x-dead-letter-exchange".into(),
        long_string(&retry_exchange(&settings.exchange)),
    );
    main_args.insert("x-dead-letter-routing-key".into(), long_string(queue));
    channel
        .queue_declare(queue, durable, main_args)
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;

    let mut retry_args = FieldTable::default();
    retry_args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(settings.redelivery_delay.as_millis() as i64),
    );
    retry_args.insert("x-dead-letter-exchange".into(), long_string(""));
    retry_args.insert("x-dead-letter-routing-key".into(), long_string(queue));
    channel
        .queue_declare(&retry, durable, retry_args)
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to declare retry queue: {}", e)))?;

    channel
        .queue_declare(&parked_queue(queue), durable, FieldTable::default())
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to declare parked queue: {}", e)))?;

    channel
        .queue_bind(
            queue,
            &settings.exchange,
            &settings.binding,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {}", e)))?;
    channel
        .queue_bind(
            &retry,
            &retry_exchange(&settings.exchange),
            queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to bind retry queue: {}", e)))?;

    info!(
        queue = %queue,
        binding = %settings.binding,
        "Bound queue to exchange"
    );
    Ok(())
}

/// Declare the topology and start consuming.
async fn setup_consumer(pool: &Pool, settings: &ConsumerSettings) -> Result<lapin::Consumer> {
    let channel = channel_from(pool).await?;
    declare_topology(&channel, settings).await?;
    let queue = settings.queue.as_str();

    channel
        .basic_qos(settings.prefetch, BasicQosOptions::default())
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

    channel
        .basic_consume(
            queue,
            &format!("foodorder-{queue}"),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
}

fn into_delivery(delivery: lapin::message::Delivery, pool: &Pool, queue: &str) -> Delivery {
    let headers = delivery.properties.headers().as_ref();
    let routing_key = headers
        .and_then(|h| original_routing_key(h))
        .unwrap_or_else(|| delivery.routing_key.to_string());
    let attempt = 1 + headers.map(|h| death_count(h, queue)).unwrap_or(0);

    let acker = AmqpAcker {
        acker: delivery.acker,
        pool: pool.clone(),
        queue: queue.to_string(),
        routing_key: routing_key.clone(),
        payload: delivery.data.clone(),
    };
    Delivery::new(routing_key, delivery.data, attempt, Box::new(acker))
}

fn original_routing_key(headers: &FieldTable) -> Option<String> {
    match headers.inner().get(ROUTING_KEY_HEADER) {
        Some(AMQPValue::LongString(s)) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        _ => None,
    }
}

fn as_u32(value: &AMQPValue) -> Option<u32> {
    let n: i64 = match value {
        AMQPValue::LongLongInt(n) => *n,
        AMQPValue::LongInt(n) => i64::from(*n),
        AMQPValue::LongUInt(n) => i64::from(*n),
        AMQPValue::ShortInt(n) => i64::from(*n),
        AMQPValue::ShortUInt(n) => i64::from(*n),
        _ => return None,
    };
    u32::try_from(n).ok()
}

/// Times this message was dead-lettered out of `queue`.
fn death_count(headers: &FieldTable, queue: &str) -> u32 {
    let Some(AMQPValue::FieldArray(deaths)) = headers.inner().get("x-death") else {
        return 0;
    };
    deaths
        .as_slice()
        .iter()
        .filter_map(|entry| match entry {
            AMQPValue::FieldTable(table) => Some(table.inner()),
            _ => None,
        })
        .filter(|entry| {
            matches!(entry.get("queue"), Some(AMQPValue::LongString(q)) if q.as_bytes() == queue.as_bytes())
        })
        .filter_map(|entry| entry.get("count").and_then(as_u32))
        .sum()
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
    pool: Pool,
    queue: String,
    routing_key: String,
    payload: Vec<u8>,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Acknowledge(format!("Failed to ack: {}", e)))
    }

    async fn nack(&self) -> Result<()> {
        // Without requeue the broker dead-letters into the retry queue.
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Acknowledge(format!("Failed to nack: {}", e)))
    }

    async fn reject(&self) -> Result<()> {
        let parked = parked_queue(&self.queue);
        let channel = channel_from(&self.pool).await?;
        let mut headers = FieldTable::default();
        headers.insert(ROUTING_KEY_HEADER.into(), long_string(&self.routing_key));

        channel
            .basic_publish(
                "",
                &parked,
                BasicPublishOptions::default(),
                &self.payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2)
                    .with_headers(headers),
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to park message: {}", e)))?;

        warn!(queue = %self.queue, parked = %parked, "Message parked");
        self.ack().await
    }
}

#[async_trait]
impl MessageBus for AmqpMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let backoff = connection_backoff()
            .with_max_times(MAX_PUBLISH_RETRIES)
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            let channel = match channel_from(&self.pool).await {
                Ok(ch) => ch,
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = MAX_PUBLISH_RETRIES,
                        error = %e,
                        "Failed to get channel, retrying..."
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            let mut headers = FieldTable::default();
            headers.insert(
                ShortString::from(ROUTING_KEY_HEADER),
                long_string(routing_key),
            );
            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2)
                .with_headers(headers);

            let result = channel
                .basic_publish(
                    &self.config.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await;

            match result {
                Ok(confirm) => match confirm.await {
                    Ok(_) => {
                        debug!(exchange = %self.config.exchange, "Published message");
                        return Ok(());
                    }
                    Err(e) => {
                        error!(
                            attempt = attempt + 1,
                            error = %e,
                            "Publish confirmation failed, retrying..."
                        );
                        last_error = Some(BusError::Publish(format!(
                            "Publish confirmation failed: {}",
                            e
                        )));
                    }
                },
                Err(e) => {
                    error!(attempt = attempt + 1, error = %e, "Publish failed, retrying...");
                    last_error = Some(BusError::Publish(format!("Failed to publish: {}", e)));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string())))
    }

    async fn subscribe(&self, queue: &str, binding: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let settings = ConsumerSettings {
            exchange: self.config.exchange.clone(),
            queue: queue.to_string(),
            binding: binding.to_string(),
            prefetch: self.config.prefetch,
            redelivery_delay: self.redelivery_delay,
        };

        // Declare up front so publishes made before the consumer task
        // connects are kept.
        let channel = channel_from(&self.pool).await?;
        declare_topology(&channel, &settings).await?;

        let (sender, receiver) = mpsc::channel(usize::from(self.config.prefetch.max(1)));
        tokio::spawn(Self::consume_with_reconnect(
            self.pool.clone(),
            settings,
            sender,
            self.closed.subscribe(),
        ));

        Ok(ReceiverStream::new(receiver).boxed())
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        self.pool.close();
        info!("AMQP message bus closed");
        Ok(())
    }
}
