use crate::listener::MessageListener;
use crate::message::{Body, Email, Message, MessageError, TypedPayload};
use async_trait::async_trait;
use serde::Deserialize;

/// What a received message turned out to be. Every message lands in exactly
/// one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// Text body tagged with the `Email` type id.
    Typed(Email),
    /// Object envelope whose content is an `Email`.
    Wrapped(Email),
    Unrecognized(Message),
}

impl Received {
    pub fn classify(message: Message) -> Self {
        let decoded = match &message.body {
            Body::Text(text) if message.type_id() == Some(Email::TYPE_ID) => {
                serde_json::from_str::<Email>(text)
                    .map(Received::Typed)
                    .map_err(|e| {
                        log::warn!(
                            "Message {} is tagged {} but does not decode: {}",
                            message.id,
                            Email::TYPE_ID,
                            e
                        )
                    })
                    .ok()
            }
            Body::Object(value) => Email::deserialize(value).map(Received::Wrapped).ok(),
            Body::Text(_) => None,
        };

        decoded.unwrap_or(Received::Unrecognized(message))
    }

    /// The line the receiver prints for this message.
    pub fn line(&self) -> String {
        match self {
            Received::Typed(email) => format!("Received <{}>", email),
            Received::Wrapped(email) => format!("Received Object Message <{}>", email),
            Received::Unrecognized(message) => format!("Else Case {:?}", message),
        }
    }
}

/// Logs every message it is handed, whatever its shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct Receiver;

#[async_trait]
impl MessageListener for Receiver {
    async fn on_message(&self, message: Message) -> Result<(), MessageError> {
        log::info!("{}", Received::classify(message).line());
        Ok(())
    }
}

/// Logs the body of text messages. Anything else is logged and dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextListener;

impl TextListener {
    pub fn line(message: &Message) -> Result<String, MessageError> {
        Ok(format!("Message received: \"{}\"", message.text()?))
    }
}

#[async_trait]
impl MessageListener for TextListener {
    async fn on_message(&self, message: Message) -> Result<(), MessageError> {
        match Self::line(&message) {
            Ok(line) => log::info!("{}", line),
            Err(e) => log::warn!("Dropping message {}: {}", message.id, e),
        }
        Ok(())
    }
}
