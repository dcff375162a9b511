use crate::destination::{Destination, MAILBOX_DESTINATION};
use crate::redis_broker::DEFAULT_REDIS_URL;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Top-level settings for the demo binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub listener: ListenerSettings,
    pub log_level: String,
}

/// Where the broker lives and which destination the demo talks to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// `redis://host:port/` for a Redis broker, `memory://` for the
    /// in-process one.
    pub url: String,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub concurrency: usize,
    pub pub_sub_domain: bool,
    pub receive_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            listener: ListenerSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            destination: MAILBOX_DESTINATION.to_string(),
        }
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            pub_sub_domain: false,
            receive_timeout_ms: 1000,
        }
    }
}

impl Settings {
    pub fn destination(&self) -> Destination {
        Destination::for_domain(&self.broker.destination, self.listener.pub_sub_domain)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.listener.receive_timeout_ms)
    }
}

/// Loads `config/default` (any format the `config` crate knows, optional),
/// then `MAILBOX__`-prefixed environment variables such as
/// `MAILBOX__LISTENER__CONCURRENCY=20`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MAILBOX")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    builder.build()?.try_deserialize()
}
