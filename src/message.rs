use crate::destination::Destination;
use redis::RedisError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Message property carrying the type tag of a converted payload.
pub const TYPE_ID_PROPERTY: &str = "_type";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Body {
    Text(String),
    /// Generic envelope around a serialized object.
    Object(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub destination: String,
    pub body: Body,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub timestamp: u64,
}

impl Message {
    pub fn new(destination: &Destination, body: Body) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            destination: destination.name().to_string(),
            body,
            properties: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The declared type tag, if the producer set one.
    pub fn type_id(&self) -> Option<&str> {
        self.properties.get(TYPE_ID_PROPERTY).map(String::as_str)
    }

    pub fn text(&self) -> Result<&str, MessageError> {
        match &self.body {
            Body::Text(text) => Ok(text),
            Body::Object(_) => Err(MessageError::UnexpectedBody { expected: "text" }),
        }
    }

    pub(crate) fn to_wire(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_wire(raw: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A payload that can travel with a `_type` tag and be recognized on receipt.
pub trait TypedPayload: Serialize + DeserializeOwned {
    const TYPE_ID: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub address: String,
    pub subject: String,
}

impl Email {
    pub fn new(address: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            subject: subject.into(),
        }
    }
}

impl TypedPayload for Email {
    const TYPE_ID: &'static str = "Email";
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Email{{address={}, subject={}}}", self.address, self.subject)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Broker unavailable at {0}")]
    ConnectionRefused(String),
    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),
    #[error("Unexpected message body, expected {expected}")]
    UnexpectedBody { expected: &'static str },
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    RedisError(#[from] RedisError),
    #[error("Listener error: {0}")]
    ListenerError(String),
}

impl MessageError {
    /// Connection-level failures: the broker is gone or the destination
    /// cannot be routed. Nothing retries these.
    pub fn is_connection_error(&self) -> bool {
        match self {
            MessageError::ConnectionRefused(_) | MessageError::InvalidDestination(_) => true,
            MessageError::RedisError(e) => {
                e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error()
            }
            _ => false,
        }
    }
}
