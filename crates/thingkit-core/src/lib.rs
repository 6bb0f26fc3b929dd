//! Device-side runtime for a cloud-managed pub/sub fleet.
//!
//! A device ("Thing") authenticates with short-lived signed tokens,
//! receives configuration on a per-device topic and publishes state and
//! telemetry through an external transport client:
//!
//! - **[`Thing`]**: lifecycle facade. [`connect()`](Thing::connect) builds
//!   and configures a transport client, installs a token-backed
//!   [`CredentialsProvider`] and subscribes the config topic on every
//!   (re)connect. [`publish_state()`](Thing::publish_state) and
//!   [`publish_event()`](Thing::publish_event) go through a shared
//!   [`RateGate`].
//!
//! - **[`Identity`]**: derives the client id and the config, state and
//!   events topics.
//!
//! - **[`Credentials`]** and [`issue_token`]: RS256/ES256 bearer tokens with
//!   the project id as audience.
//!
//! - **Transport capability** ([`transport`]): object-safe traits the wire
//!   protocol implements. [`mock`] ships an in-memory implementation.

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod mock;
pub mod thing;
pub mod token;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::ThingOptions;
pub use credentials::{Certificate, Credentials, KeyType, Signer};
pub use dispatch::ConfigHandler;
pub use error::ThingError;
pub use gate::{DEFAULT_PUBLISH_INTERVAL, RateGate};
pub use identity::{Identity, TopicKind, topic};
pub use logging::{LogSink, LogSinks, TracingSink};
pub use thing::{ConnectionState, Thing};
pub use token::{
    BearerToken, Claims, DEFAULT_TOKEN_EXPIRATION, MAX_TOKEN_EXPIRATION, MIN_TOKEN_EXPIRATION,
    TokenCredentials, TokenError, clamp_token_expiration, issue_token,
};
pub use transport::{
    CredentialsProvider, MessageHandler, MqttCredentials, OnConnect, OnConnectionLost, QoS,
    QueueStore, TransportClient, TransportError, TransportFactory, TransportSettings,
};

// Re-exported so callers need not depend on these crates directly.
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
