use crate::destination::Destination;
use crate::message::{Message, MessageError};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;

/// An open channel to the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Hands the message to the broker; returns once the broker has taken it.
    async fn send(&self, destination: &Destination, message: Message) -> Result<(), MessageError>;

    /// Opens a consumer on the destination. For topics the subscription is
    /// live as soon as this returns.
    async fn create_consumer(&self, destination: &Destination)
        -> Result<Box<dyn Consumer>, MessageError>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Waits for the next message. `None` waits forever; `Ok(None)` means the
    /// timeout elapsed with nothing delivered.
    ///
    /// Queue consumers are cancel-safe: dropping the future before it
    /// resolves leaves the message on the queue.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, MessageError>;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>, MessageError>;

    /// Address of the broker this factory talks to.
    fn endpoint(&self) -> &str;
}

/// Hands out a single shared connection from the wrapped factory.
pub struct CachingConnectionFactory {
    target: Arc<dyn ConnectionFactory>,
    cached: OnceCell<Arc<dyn Connection>>,
}

impl CachingConnectionFactory {
    pub fn new(target: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            target,
            cached: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.cached.initialized()
    }
}

#[async_trait]
impl ConnectionFactory for CachingConnectionFactory {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>, MessageError> {
        // A failed attempt leaves the cell empty so the next caller tries again.
        let connection = self
            .cached
            .get_or_try_init(|| async {
                log::debug!("Opening shared connection to {}", self.target.endpoint());
                self.target.create_connection().await
            })
            .await?;
        Ok(connection.clone())
    }

    fn endpoint(&self) -> &str {
        self.target.endpoint()
    }
}
