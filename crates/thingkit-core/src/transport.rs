// ── Transport client capability ──
//
// The pub/sub wire protocol lives outside this crate. `Thing` only talks
// to a transport through these traits: a factory builds one client per
// connection attempt, `Thing` configures it through the setters, and
// then shares it behind an `Arc` for the lifetime of the session.
//
// Futures are boxed so the traits stay object safe and `Send`.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::logging::LogSink;
use crate::token::TokenError;

// ── QoS ─────────────────────────────────────────────────────────────

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid QoS level {0} (expected 0, 1 or 2)")]
pub struct InvalidQoS(pub u8);

// ── Errors ──────────────────────────────────────────────────────────

/// Failure reported by a transport client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    /// The operation was sent but not acknowledged in time.
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("transport operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl TransportError {
    /// Wrap any other failure.
    ///
    /// A transport that cannot obtain credentials should pass the
    /// provider's `TokenError` through here; `Thing` reports it as a
    /// signing failure.
    pub fn other(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

// ── Capabilities handed to the transport ───────────────────────────

/// Username/password pair presented on a connection attempt.
#[derive(Debug, Clone)]
pub struct MqttCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Called by the transport before every connection and reconnection attempt.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<MqttCredentials, TokenError>;
}

/// Handles messages delivered on a subscribed topic.
///
/// The returned future owns everything it needs, so a transport may spawn it.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: Bytes) -> BoxFuture<'static, ()>;
}

/// Invoked by the transport each time a session is established.
pub trait OnConnect: Send + Sync {
    fn on_connect<'a>(&'a self, client: &'a dyn TransportClient) -> BoxFuture<'a, ()>;
}

/// Invoked by the transport when an established session drops.
pub trait OnConnectionLost: Send + Sync {
    fn on_connection_lost(&self, error: &TransportError);
}

// ── Transport client ───────────────────────────────────────────────

/// A pub/sub client for one device session.
///
/// Setters are only called before the client is shared. Every other
/// operation receives the caller's cancellation token; cancellation stops
/// the caller from waiting but does not have to recall work already sent.
pub trait TransportClient: Send + Sync {
    fn is_connected(&self) -> bool;

    fn connect<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        brokers: &'a [String],
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn disconnect<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn publish<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        topic: &'a str,
        qos: QoS,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn subscribe<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        topic: &'a str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn unsubscribe<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn set_client_id(&mut self, client_id: String);

    fn set_credentials_provider(&mut self, provider: Arc<dyn CredentialsProvider>);

    fn set_on_connect(&mut self, handler: Arc<dyn OnConnect>);

    /// Transports that never report lost sessions may keep the default.
    fn set_on_connection_lost(&mut self, _handler: Arc<dyn OnConnectionLost>) {}

    fn set_debug_logger(&mut self, sink: Arc<dyn LogSink>);

    fn set_info_logger(&mut self, sink: Arc<dyn LogSink>);

    fn set_error_logger(&mut self, sink: Arc<dyn LogSink>);
}

// ── Factory ─────────────────────────────────────────────────────────

/// Where the transport keeps messages queued while offline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueueStore {
    /// Volatile, lost on restart.
    #[default]
    Memory,
    /// Persisted under the given directory.
    Directory(PathBuf),
}

/// Everything a factory needs to build a client.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub credentials: Arc<Credentials>,
    pub queue: QueueStore,
}

/// Builds a fresh transport client for each connection attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self, settings: &TransportSettings) -> Box<dyn TransportClient>;
}

impl<F> TransportFactory for F
where
    F: Fn(&TransportSettings) -> Box<dyn TransportClient> + Send + Sync,
{
    fn create(&self, settings: &TransportSettings) -> Box<dyn TransportClient> {
        self(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_round_trips_through_level() {
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
        assert_eq!(QoS::try_from(3), Err(InvalidQoS(3)));
    }

    #[test]
    fn boxed_errors_surface_their_message() {
        let err = TransportError::other("broker went away");
        assert_eq!(err.to_string(), "broker went away");
    }
}
