use crate::connection::ConnectionFactory;
use crate::destination::Destination;
use crate::message::{Body, Message, MessageError, TypedPayload, TYPE_ID_PROPERTY};
use std::{sync::Arc, time::Duration};

/// Context handed to a message creator. Messages it builds are addressed to
/// the destination being sent to.
pub struct Session<'a> {
    destination: &'a Destination,
}

impl<'a> Session<'a> {
    pub(crate) fn new(destination: &'a Destination) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &Destination {
        self.destination
    }

    pub fn create_text_message(&self, text: impl Into<String>) -> Message {
        Message::new(self.destination, Body::Text(text.into()))
    }

    /// Wraps the payload in a generic object envelope.
    pub fn create_object_message<T: TypedPayload>(&self, payload: &T) -> Result<Message, MessageError> {
        let value = serde_json::to_value(payload)?;
        Ok(Message::new(self.destination, Body::Object(value))
            .with_property(TYPE_ID_PROPERTY, T::TYPE_ID))
    }

    /// Sends the payload as JSON text tagged with its type id.
    pub fn create_typed_message<T: TypedPayload>(&self, payload: &T) -> Result<Message, MessageError> {
        let text = serde_json::to_string(payload)?;
        Ok(Message::new(self.destination, Body::Text(text))
            .with_property(TYPE_ID_PROPERTY, T::TYPE_ID))
    }
}

/// Synchronous producer: every call returns once the broker has the message.
/// There is no retry; a broker failure surfaces to the caller.
pub struct MessageTemplate {
    factory: Arc<dyn ConnectionFactory>,
    receive_timeout: Option<Duration>,
}

impl MessageTemplate {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            receive_timeout: None,
        }
    }

    /// How long `receive` waits. `None` waits until a message arrives.
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Builds a message with `creator` (called exactly once) and sends it.
    pub async fn send<F>(&self, destination: &Destination, creator: F) -> Result<(), MessageError>
    where
        F: FnOnce(&Session<'_>) -> Result<Message, MessageError>,
    {
        destination.validate()?;
        let connection = self.factory.create_connection().await?;

        let message = creator(&Session::new(destination))?;
        let id = message.id;
        connection.send(destination, message).await?;

        log::debug!("Message {} sent to {}", id, destination);
        Ok(())
    }

    pub async fn send_text(&self, destination: &Destination, text: &str) -> Result<(), MessageError> {
        self.send(destination, |session| Ok(session.create_text_message(text)))
            .await
    }

    /// Sends the payload as type-tagged JSON text.
    pub async fn convert_and_send<T: TypedPayload>(
        &self,
        destination: &Destination,
        payload: &T,
    ) -> Result<(), MessageError> {
        self.send(destination, |session| session.create_typed_message(payload))
            .await
    }

    /// Polls a single message. `Ok(None)` when the receive timeout elapses.
    pub async fn receive(&self, destination: &Destination) -> Result<Option<Message>, MessageError> {
        destination.validate()?;
        let connection = self.factory.create_connection().await?;
        let mut consumer = connection.create_consumer(destination).await?;
        consumer.receive(self.receive_timeout).await
    }
}
