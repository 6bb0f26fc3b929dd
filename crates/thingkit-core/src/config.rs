// ── Runtime options for a Thing ──
//
// Built by the caller (or by `thingkit-config`) and handed to
// `Thing::new`. Core never reads files or the environment itself.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::dispatch::ConfigHandler;
use crate::gate::DEFAULT_PUBLISH_INTERVAL;
use crate::identity::Identity;
use crate::logging::LogSinks;
use crate::token::DEFAULT_TOKEN_EXPIRATION;
use crate::transport::{QoS, QueueStore};

/// Options for a single device endpoint.
///
/// Immutable once `Thing::connect` begins.
#[derive(Clone)]
pub struct ThingOptions {
    /// Identifies the device. Required.
    pub identity: Option<Identity>,
    /// Authenticates the device. Required.
    pub credentials: Option<Arc<Credentials>>,
    /// Optional debug/info/error sinks.
    pub loggers: LogSinks,
    /// Also route transport-internal logs through `loggers`.
    pub log_mqtt: bool,
    /// Directory for the transport's offline queue; `None` keeps it in memory.
    pub queue_directory: Option<PathBuf>,
    /// Invoked for every configuration document received.
    pub config_handler: Option<Arc<dyn ConfigHandler>>,
    pub config_qos: QoS,
    pub state_qos: QoS,
    pub event_qos: QoS,
    /// Lifetime of each auth token, clamped to `[10m, 24h]` on connect.
    pub auth_token_expiration: Duration,
    /// Minimum spacing between two publishes.
    pub publish_interval: Duration,
}

impl ThingOptions {
    /// Defaults with the required identity and credentials filled in.
    pub fn new(identity: Identity, credentials: impl Into<Arc<Credentials>>) -> Self {
        Self {
            identity: Some(identity),
            credentials: Some(credentials.into()),
            ..Self::default()
        }
    }

    pub fn with_config_handler(mut self, handler: impl ConfigHandler + 'static) -> Self {
        self.config_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_loggers(mut self, loggers: LogSinks) -> Self {
        self.loggers = loggers;
        self
    }

    pub(crate) fn queue_store(&self) -> QueueStore {
        match &self.queue_directory {
            Some(dir) if !dir.as_os_str().is_empty() => QueueStore::Directory(dir.clone()),
            _ => QueueStore::Memory,
        }
    }
}

impl Default for ThingOptions {
    fn default() -> Self {
        Self {
            identity: None,
            credentials: None,
            loggers: LogSinks::default(),
            log_mqtt: false,
            queue_directory: None,
            config_handler: None,
            config_qos: QoS::ExactlyOnce,
            state_qos: QoS::AtLeastOnce,
            event_qos: QoS::AtLeastOnce,
            auth_token_expiration: DEFAULT_TOKEN_EXPIRATION,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

impl fmt::Debug for ThingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThingOptions")
            .field("identity", &self.identity)
            .field("credentials", &self.credentials.as_ref().map(|c| c.key_type()))
            .field("loggers", &self.loggers)
            .field("log_mqtt", &self.log_mqtt)
            .field("queue_directory", &self.queue_directory)
            .field("config_handler", &self.config_handler.is_some())
            .field("config_qos", &self.config_qos)
            .field("state_qos", &self.state_qos)
            .field("event_qos", &self.event_qos)
            .field("auth_token_expiration", &self.auth_token_expiration)
            .field("publish_interval", &self.publish_interval)
            .finish()
    }
}
