use crate::message::MessageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination name shared by the demo producer and consumers.
pub const MAILBOX_DESTINATION: &str = "mailbox-destination";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Point-to-point: every message goes to exactly one consumer.
    Queue,
    /// Publish/subscribe: every message goes to all current subscribers.
    Topic,
}

/// A named mailbox on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }

    /// Builds a queue or a topic depending on `pub_sub_domain`.
    pub fn for_domain(name: impl Into<String>, pub_sub_domain: bool) -> Self {
        if pub_sub_domain {
            Self::topic(name)
        } else {
            Self::queue(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn is_topic(&self) -> bool {
        self.kind == DestinationKind::Topic
    }

    /// Rejects names the broker could not route: empty or containing whitespace.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(MessageError::InvalidDestination(self.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DestinationKind::Queue => write!(f, "queue://{}", self.name),
            DestinationKind::Topic => write!(f, "topic://{}", self.name),
        }
    }
}
