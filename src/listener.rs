use crate::connection::{ConnectionFactory, Consumer};
use crate::destination::Destination;
use crate::message::{Message, MessageError};
use async_trait::async_trait;
use futures::FutureExt;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Floor for the worker receive timeout; zero would make idle workers spin.
pub const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// Handles messages delivered by a [`ListenerContainer`]. Several workers may
/// call it at once. Errors are logged by the container and never stop it.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: Message) -> Result<(), MessageError>;
}

/// Adapts an async closure into a [`MessageListener`].
pub struct FnListener<F>(F);

impl<F> FnListener<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> MessageListener for FnListener<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MessageError>> + Send + 'static,
{
    async fn on_message(&self, message: Message) -> Result<(), MessageError> {
        (self.0)(message).await
    }
}

/// Runs a pool of consumers on one destination and hands each delivered
/// message to the listener.
///
/// Queues get `concurrency` competing consumers, so each message reaches
/// exactly one worker. A topic gets a single subscription regardless of
/// `concurrency`, otherwise every message would be handled once per worker.
pub struct ListenerContainer {
    factory: Arc<dyn ConnectionFactory>,
    destination: Destination,
    listener: Arc<dyn MessageListener>,
    concurrency: usize,
    receive_timeout: Duration,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    spawned: usize,
}

impl ListenerContainer {
    pub fn new<L>(factory: Arc<dyn ConnectionFactory>, destination: Destination, listener: L) -> Self
    where
        L: MessageListener + 'static,
    {
        Self {
            factory,
            destination,
            listener: Arc::new(listener),
            concurrency: 1,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            spawned: 0,
        }
    }

    pub fn concurrency(mut self, consumers: usize) -> Self {
        self.concurrency = consumers.max(1);
        self
    }

    /// Upper bound on how long a worker waits before re-checking for shutdown.
    /// Clamped to [`MIN_RECEIVE_TIMEOUT`].
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout.max(MIN_RECEIVE_TIMEOUT);
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// True while at least one worker is still consuming.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.active_consumers() > 0
    }

    /// Workers still consuming. Drops below the configured count when a
    /// worker loses its connection.
    pub fn active_consumers(&self) -> usize {
        self.workers.iter().filter(|worker| !worker.is_finished()).count()
    }

    /// Opens every consumer, then spawns the workers. Once this returns, a
    /// topic subscription is live.
    ///
    /// Calling it again replaces workers that exited after losing the broker;
    /// workers still consuming are left alone.
    pub async fn start(&mut self) -> Result<(), MessageError> {
        self.workers.retain(|worker| !worker.is_finished());
        let wanted = self.consumer_count();
        if self.running.load(Ordering::SeqCst) && self.workers.len() >= wanted {
            return Ok(());
        }
        self.destination.validate()?;

        let connection = self.factory.create_connection().await?;
        let missing = wanted - self.workers.len();
        let mut opened = Vec::with_capacity(missing);
        for _ in 0..missing {
            opened.push(connection.create_consumer(&self.destination).await?);
        }

        self.running.store(true, Ordering::SeqCst);
        for consumer in opened {
            let worker = Worker {
                index: self.spawned,
                destination: self.destination.clone(),
                listener: self.listener.clone(),
                running: self.running.clone(),
                receive_timeout: self.receive_timeout,
            };
            self.spawned += 1;
            self.workers.push(tokio::spawn(worker.run(consumer)));
        }

        log::info!(
            "Listener container started on {} with {} consumer(s)",
            self.destination,
            self.workers.len()
        );
        Ok(())
    }

    fn consumer_count(&self) -> usize {
        if !self.destination.is_topic() {
            return self.concurrency;
        }
        if self.concurrency > 1 {
            log::debug!(
                "Topic {} uses a single subscription, ignoring concurrency {}",
                self.destination,
                self.concurrency
            );
        }
        1
    }

    /// Signals the workers and waits for them to finish their current message.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                log::error!("Listener worker on {} ended abnormally: {}", self.destination, e);
            }
        }
        log::info!("Listener container stopped on {}", self.destination);
    }
}

impl Drop for ListenerContainer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    index: usize,
    destination: Destination,
    listener: Arc<dyn MessageListener>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
}

impl Worker {
    async fn run(self, mut consumer: Box<dyn Consumer>) {
        log::debug!("Consumer #{} listening on {}", self.index, self.destination);

        while self.running.load(Ordering::SeqCst) {
            match consumer.receive(Some(self.receive_timeout)).await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => continue,
                // Only a garbled payload is skipped; the next one may be fine.
                Err(e @ MessageError::SerializationError(_)) => {
                    log::warn!(
                        "Consumer #{} on {} dropped an unreadable message: {}",
                        self.index,
                        self.destination,
                        e
                    );
                }
                Err(e) => {
                    log::error!(
                        "Consumer #{} on {} stopped: {}",
                        self.index,
                        self.destination,
                        e
                    );
                    break;
                }
            }
        }

        log::debug!("Consumer #{} on {} exited", self.index, self.destination);
    }

    async fn dispatch(&self, message: Message) {
        let id = message.id;
        let outcome = AssertUnwindSafe(self.listener.on_message(message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Listener failed on message {}: {}", id, e),
            Err(_) => log::error!("Listener panicked on message {}", id),
        }
    }
}
