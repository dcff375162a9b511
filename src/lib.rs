pub mod connection;
pub mod destination;
pub mod listener;
pub mod memory;
pub mod message;
pub mod receiver;
pub mod redis_broker;
pub mod settings;
pub mod template;


pub use connection::{CachingConnectionFactory, Connection, ConnectionFactory, Consumer};
pub use destination::{Destination, DestinationKind, MAILBOX_DESTINATION};
pub use listener::{FnListener, ListenerContainer, MessageListener};
pub use memory::InMemoryBroker;
pub use message::{Body, Email, Message, MessageError, TypedPayload};
pub use receiver::{Received, Receiver, TextListener};
pub use redis_broker::RedisConnectionFactory;
pub use template::{MessageTemplate, Session};
