//! In-process broker for standalone mode and tests.
//!
//! Models a topic exchange with durable named queues. Each queue is an
//! unbounded FIFO shared by every subscription to it. Nacked messages are
//! re-enqueued at the tail after `redelivery_delay` with `attempt + 1`.
//! Rejected messages land in an inspectable dead-letter list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{topic_matches, Acker, BusError, Delivery, MessageBus, Result, Subscription};

/// Configuration for the channel broker.
#[derive(Clone, Debug)]
pub struct ChannelBusConfig {
    /// How long a nacked message waits before it is redelivered.
    pub redelivery_delay: Duration,
}

impl Default for ChannelBusConfig {
    fn default() -> Self {
        Self {
            redelivery_delay: Duration::from_secs(1),
        }
    }
}

impl ChannelBusConfig {
    pub fn with_redelivery_delay(delay: Duration) -> Self {
        Self {
            redelivery_delay: delay,
        }
    }
}

/// A message that was rejected instead of processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    routing_key: String,
    payload: Vec<u8>,
    attempt: u32,
}

struct Queue {
    name: String,
    bindings: RwLock<Vec<String>>,
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<QueuedMessage>>,
}

impl Queue {
    fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            bindings: RwLock::new(Vec::new()),
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    async fn bind(&self, binding: &str) {
        let mut bindings = self.bindings.write().await;
        if !bindings.iter().any(|b| b == binding) {
            bindings.push(binding.to_string());
        }
    }

    async fn accepts(&self, routing_key: &str) -> bool {
        self.bindings
            .read()
            .await
            .iter()
            .any(|b| topic_matches(b, routing_key))
    }

    fn enqueue(&self, message: QueuedMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// In-process topic broker.
pub struct ChannelMessageBus {
    config: ChannelBusConfig,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    closed: watch::Sender<bool>,
}

impl Default for ChannelMessageBus {
    fn default() -> Self {
        Self::new(ChannelBusConfig::default())
    }
}

impl ChannelMessageBus {
    pub fn new(config: ChannelBusConfig) -> Self {
        let (closed, _) = watch::channel(false);

        info!(
            redelivery_delay_ms = config.redelivery_delay.as_millis() as u64,
            "Channel message bus initialized"
        );

        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            closed,
        }
    }

    /// Declare and bind a queue without consuming it.
    ///
    /// Messages published after this call are kept until a subscriber
    /// drains them.
    pub async fn declare_queue(&self, queue: &str, binding: &str) -> Result<()> {
        self.ensure_open()?;
        self.queue(queue).await.bind(binding).await;
        debug!(queue = %queue, binding = %binding, "Queue declared");
        Ok(())
    }

    /// Messages rejected so far, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    async fn queue(&self, name: &str) -> Arc<Queue> {
        if let Some(queue) = self.queues.read().await.get(name) {
            return queue.clone();
        }
        self.queues
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new(name)))
            .clone()
    }

    fn deliveries(&self, queue: Arc<Queue>) -> Subscription {
        let closed = self.closed.subscribe();
        let dead_letters = self.dead_letters.clone();
        let delay = self.config.redelivery_delay;

        futures::stream::unfold(
            (queue, closed, dead_letters),
            move |(queue, mut closed, dead_letters)| async move {
                if *closed.borrow() {
                    return None;
                }
                let message = {
                    let mut receiver = queue.receiver.lock().await;
                    tokio::select! {
                        _ = closed.changed() => None,
                        message = receiver.recv() => message,
                    }
                }?;

                let acker = ChannelAcker {
                    queue: queue.clone(),
                    message: message.clone(),
                    dead_letters: dead_letters.clone(),
                    delay,
                };
                let delivery = Delivery::new(
                    message.routing_key,
                    message.payload,
                    message.attempt,
                    Box::new(acker),
                );
                Some((delivery, (queue, closed, dead_letters)))
            },
        )
        .boxed()
    }
}

#[async_trait]
impl MessageBus for ChannelMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let queues: Vec<Arc<Queue>> = self.queues.read().await.values().cloned().collect();
        let mut routed = 0usize;
        for queue in queues {
            if queue.accepts(routing_key).await {
                let message = QueuedMessage {
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    attempt: 1,
                };
                if queue.enqueue(message) {
                    routed += 1;
                }
            }
        }

        // Unroutable messages are dropped, as on a real topic exchange.
        debug!(queues = routed, "Published message to channel bus");
        Ok(())
    }

    async fn subscribe(&self, queue: &str, binding: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let queue = self.queue(queue).await;
        queue.bind(binding).await;

        info!(queue = %queue.name, binding = %binding, "Subscribed to channel bus");
        Ok(self.deliveries(queue))
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        self.queues.write().await.clear();
        info!("Channel message bus closed");
        Ok(())
    }
}

struct ChannelAcker {
    queue: Arc<Queue>,
    message: QueuedMessage,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    delay: Duration,
}

#[async_trait]
impl Acker for ChannelAcker {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        let queue = self.queue.clone();
        let mut message = self.message.clone();
        message.attempt += 1;
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !queue.enqueue(message) {
                warn!(queue = %queue.name, "Dropped redelivery, queue is gone");
            }
        });
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        warn!(
            queue = %self.queue.name,
            routing_key = %self.message.routing_key,
            attempt = self.message.attempt,
            "Message dead-lettered"
        );
        self.dead_letters.write().await.push(DeadLetter {
            queue: self.queue.name.clone(),
            routing_key: self.message.routing_key.clone(),
            payload: self.message.payload.clone(),
            attempt: self.message.attempt,
        });
        Ok(())
    }
}
