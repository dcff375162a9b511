use crate::connection::{Connection, ConnectionFactory, Consumer};
use crate::destination::{Destination, DestinationKind};
use crate::message::{Message, MessageError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    AsyncCommands, Client, RedisResult,
};
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::{sync::oneshot, time};

type PubSubStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Default broker endpoint.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";

fn queue_key(destination: &Destination) -> String {
    format!("queue:{}", destination.name())
}

fn topic_channel(destination: &Destination) -> String {
    format!("topic:{}", destination.name())
}

/// Opens connections to a Redis server acting as the broker. Queues are Redis
/// lists, topics are pub/sub channels.
pub struct RedisConnectionFactory {
    url: String,
    client: Client,
}

impl RedisConnectionFactory {
    pub fn new(url: &str) -> Result<Self, MessageError> {
        let client = Client::open(url)?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>, MessageError> {
        let redis = ConnectionManager::new(self.client.clone()).await?;
        log::debug!("Connected to broker at {}", self.url);

        Ok(Arc::new(RedisConnection {
            url: self.url.clone(),
            client: self.client.clone(),
            redis,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

pub struct RedisConnection {
    url: String,
    client: Client,
    redis: ConnectionManager,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn send(&self, destination: &Destination, message: Message) -> Result<(), MessageError> {
        destination.validate()?;
        let mut conn = self.redis.clone();
        let payload = message.to_wire()?;

        match destination.kind() {
            DestinationKind::Queue => {
                let _: () = conn.rpush(queue_key(destination), payload).await?;
            }
            DestinationKind::Topic => {
                let _: () = conn.publish(topic_channel(destination), payload).await?;
            }
        }

        log::debug!("Sent {} to {}", message.id, destination);
        Ok(())
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn Consumer>, MessageError> {
        destination.validate()?;

        match destination.kind() {
            DestinationKind::Queue => {
                // BLPOP holds its connection, so every consumer gets its own.
                let conn = self.client.get_multiplexed_tokio_connection().await?;
                Ok(Box::new(RedisQueueConsumer {
                    url: self.url.clone(),
                    conn,
                    requeue: self.redis.clone(),
                    key: queue_key(destination),
                }))
            }
            DestinationKind::Topic => {
                let channel = topic_channel(destination);
                let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
                pubsub.subscribe(&channel).await?;
                Ok(Box::new(RedisTopicConsumer {
                    url: self.url.clone(),
                    messages: Box::pin(pubsub.into_on_message()),
                }))
            }
        }
    }
}

struct RedisQueueConsumer {
    url: String,
    conn: MultiplexedConnection,
    // Separate from `conn`, which may still be blocked in an abandoned BLPOP.
    requeue: ConnectionManager,
    key: String,
}

#[async_trait]
impl Consumer for RedisQueueConsumer {
    /// Cancel-safe: the pop runs in its own task. If this future is dropped
    /// before the reply arrives, the task pushes the message back onto the
    /// head of the queue.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, MessageError> {
        // BLPOP treats 0 as "block forever".
        let seconds = timeout.map_or(0.0, |limit| limit.as_secs_f64().max(0.001));
        let (tx, rx) = oneshot::channel();
        let mut conn = self.conn.clone();
        let mut requeue = self.requeue.clone();
        let key = self.key.clone();

        tokio::spawn(async move {
            let popped: RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
                .arg(&key)
                .arg(seconds)
                .query_async(&mut conn)
                .await;

            if let Err(Ok(Some((_, raw)))) = tx.send(popped) {
                let restored: RedisResult<()> = requeue.lpush(&key, raw).await;
                match restored {
                    Ok(()) => log::debug!("Returned an abandoned delivery to {}", key),
                    Err(e) => log::error!("Lost a delivery from {}: {}", key, e),
                }
            }
        });

        let popped = rx
            .await
            .map_err(|_| MessageError::ConnectionRefused(self.url.clone()))??;

        popped
            .map(|(_, raw)| Message::from_wire(&raw))
            .transpose()
    }
}

struct RedisTopicConsumer {
    url: String,
    messages: PubSubStream,
}

#[async_trait]
impl Consumer for RedisTopicConsumer {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>, MessageError> {
        let next = match timeout {
            Some(limit) => match time::timeout(limit, self.messages.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            },
            None => self.messages.next().await,
        };

        match next {
            Some(msg) => {
                let raw: String = msg.get_payload()?;
                Message::from_wire(&raw).map(Some)
            }
            None => Err(MessageError::ConnectionRefused(self.url.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_subscription_reports_the_broker_url() {
        let mut consumer = RedisTopicConsumer {
            url: DEFAULT_REDIS_URL.to_string(),
            messages: Box::pin(futures::stream::empty()),
        };

        match consumer.receive(None).await {
            Err(MessageError::ConnectionRefused(endpoint)) => assert_eq!(endpoint, DEFAULT_REDIS_URL),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
