//! In-process broker with the same queue and topic semantics as the Redis
//! one. Used by tests and by the demo binary when `broker.url` is
//! `memory://`.

use crate::connection::{Connection, ConnectionFactory, Consumer};
use crate::destination::{Destination, DestinationKind};
use crate::message::{Message, MessageError};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch, Mutex, RwLock,
    },
    time,
};

pub const MEMORY_ENDPOINT: &str = "memory://";

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    running: watch::Sender<bool>,
    queues: RwLock<HashMap<String, Arc<QueueState>>>,
    topics: RwLock<HashMap<String, Vec<UnboundedSender<Message>>>>,
}

struct QueueState {
    tx: UnboundedSender<Message>,
    // Competing consumers take turns on the receiver; the lock is fair.
    rx: Mutex<UnboundedReceiver<Message>>,
    depth: AtomicUsize,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                endpoint: MEMORY_ENDPOINT.to_string(),
                running,
                queues: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Takes the connector down. Pending sends and receives fail with
    /// `ConnectionRefused` and topic subscriptions are dropped.
    pub async fn stop(&self) {
        log::info!("Stopping in-memory broker");
        self.inner.running.send_replace(false);
        self.inner.topics.write().await.clear();
    }

    pub fn start(&self) {
        log::info!("Starting in-memory broker");
        self.inner.running.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Number of subscriptions registered on a topic, including dropped ones
    /// not yet pruned. Always zero for queues.
    pub async fn subscribers(&self, destination: &Destination) -> usize {
        if !destination.is_topic() {
            return 0;
        }
        self.inner
            .topics
            .read()
            .await
            .get(destination.name())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of messages waiting on a queue. Always zero for topics.
    pub async fn pending(&self, destination: &Destination) -> usize {
        if destination.is_topic() {
            return 0;
        }
        self.inner
            .queues
            .read()
            .await
            .get(destination.name())
            .map(|queue| queue.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Inner {
    fn ensure_running(&self) -> Result<(), MessageError> {
        if *self.running.borrow() {
            Ok(())
        } else {
            Err(self.refused())
        }
    }

    async fn queue(&self, name: &str) -> Arc<QueueState> {
        if let Some(queue) = self.queues.read().await.get(name) {
            return queue.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }

    /// Resolves once the broker has been stopped.
    async fn stopped(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|up| !*up).await;
    }

    fn refused(&self) -> MessageError {
        MessageError::ConnectionRefused(self.endpoint.clone())
    }

    /// Waits for the next delivery from `next`, bounded by `timeout` and by
    /// the broker going down.
    async fn await_delivery<F>(
        &self,
        timeout: Option<Duration>,
        next: F,
    ) -> Result<Option<Message>, MessageError>
    where
        F: std::future::Future<Output = Result<Message, MessageError>> + Send,
    {
        self.ensure_running()?;
        let bounded = async {
            match timeout {
                Some(limit) => match time::timeout(limit, next).await {
                    Ok(delivered) => delivered.map(Some),
                    Err(_) => Ok(None),
                },
                None => next.await.map(Some),
            }
        };
        tokio::select! {
            received = bounded => received,
            _ = self.stopped() => Err(self.refused()),
        }
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryBroker {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>, MessageError> {
        self.inner.ensure_running()?;
        Ok(Arc::new(self.clone()))
    }

    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

#[async_trait]
impl Connection for InMemoryBroker {
    async fn send(&self, destination: &Destination, message: Message) -> Result<(), MessageError> {
        self.inner.ensure_running()?;
        destination.validate()?;

        match destination.kind() {
            DestinationKind::Queue => {
                let queue = self.inner.queue(destination.name()).await;
                queue.depth.fetch_add(1, Ordering::SeqCst);
                // The queue owns its own receiver, so the channel never closes.
                if queue.tx.send(message).is_err() {
                    queue.depth.fetch_sub(1, Ordering::SeqCst);
                }
            }
            DestinationKind::Topic => {
                let mut topics = self.inner.topics.write().await;
                match topics.get_mut(destination.name()) {
                    Some(subscribers) => {
                        subscribers.retain(|subscriber| subscriber.send(message.clone()).is_ok());
                    }
                    None => log::debug!("No subscribers on {}, dropping {}", destination, message.id),
                }
            }
        }
        Ok(())
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn Consumer>, MessageError> {
        self.inner.ensure_running()?;
        destination.validate()?;

        match destination.kind() {
            DestinationKind::Queue => Ok(Box::new(QueueConsumer {
                broker: self.inner.clone(),
                queue: self.inner.queue(destination.name()).await,
            })),
            DestinationKind::Topic => {
                let (tx, rx) = mpsc::unbounded_channel();
                let mut topics = self.inner.topics.write().await;
                let subscribers = topics.entry(destination.name().to_string()).or_default();
                // Consumers that were dropped without a publish in between.
                subscribers.retain(|subscriber| !subscriber.is_closed());
                subscribers.push(tx);
                Ok(Box::new(TopicConsumer {
                    broker: self.inner.clone(),
                    rx,
                }))
            }
        }
    }
}

struct QueueConsumer {
    broker: Arc<Inner>,
    queue: Arc<QueueState>,
}

#[async_trait]
impl Consumer for QueueConsumer {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, MessageError> {
        let queue = self.queue.clone();
        let refused = self.broker.refused();
        let next = async move { queue.rx.lock().await.recv().await.ok_or(refused) };
        let received = self.broker.await_delivery(timeout, next).await?;
        if received.is_some() {
            self.queue.depth.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(received)
    }
}

struct TopicConsumer {
    broker: Arc<Inner>,
    rx: UnboundedReceiver<Message>,
}

#[async_trait]
impl Consumer for TopicConsumer {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, MessageError> {
        // A closed channel means the broker dropped this subscription.
        let refused = self.broker.refused();
        let rx = &mut self.rx;
        let next = async move { rx.recv().await.ok_or(refused) };
        self.broker.await_delivery(timeout, next).await
    }
}
