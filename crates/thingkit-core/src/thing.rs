// ── Thing ──
//
// Lifecycle management for a single device endpoint. Owns the transport
// client, installs the token-backed credentials provider and the config
// subscription, and gates every outbound publish.
//
// Connect and disconnect serialize on `lifecycle`. Publishers only take
// the `client` read lock long enough to clone the `Arc`. A client whose
// connect failed stays in the slot, marked stale by the Disconnected
// state, until the next connect or disconnect tears it down.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ThingOptions;
use crate::credentials::Credentials;
use crate::dispatch::{ConfigDispatcher, ConfigSubscriber};
use crate::error::ThingError;
use crate::gate::RateGate;
use crate::identity::{Identity, TopicKind, topic};
use crate::token::{TokenCredentials, clamp_token_expiration};
use crate::transport::{
    OnConnect, OnConnectionLost, QoS, TransportClient, TransportError, TransportFactory,
    TransportSettings,
};

/// Upper bound on waiting for a transport to tear down a failed session.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── Thing ────────────────────────────────────────────────────────

/// A device endpoint in a cloud-managed pub/sub fleet.
///
/// Cheaply cloneable; every clone drives the same session. Safe to use
/// from many tasks at once.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<ThingInner>,
}

struct ThingInner {
    options: ThingOptions,
    factory: Arc<dyn TransportFactory>,
    gate: RateGate,
    connection_state: watch::Sender<ConnectionState>,
    /// Held for the whole of connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    client: RwLock<Option<Arc<dyn TransportClient>>>,
    cancel: CancellationToken,
    /// Child token for the current session, cancelled on disconnect.
    session: Mutex<CancellationToken>,
}

impl Drop for ThingInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Non-owning handle held by callbacks installed on the transport.
#[derive(Clone)]
pub(crate) struct WeakThing(Weak<ThingInner>);

impl WeakThing {
    pub(crate) fn upgrade(&self) -> Option<Thing> {
        self.0.upgrade().map(|inner| Thing { inner })
    }
}

impl Thing {
    /// Create a Thing. Does NOT connect; call [`connect()`](Self::connect).
    pub fn new(options: ThingOptions, factory: impl TransportFactory + 'static) -> Self {
        Self::with_factory(options, Arc::new(factory))
    }

    pub fn with_factory(options: ThingOptions, factory: Arc<dyn TransportFactory>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let session = cancel.child_token();

        Self {
            inner: Arc::new(ThingInner {
                gate: RateGate::new(options.publish_interval),
                options,
                factory,
                connection_state,
                lifecycle: tokio::sync::Mutex::new(()),
                client: RwLock::new(None),
                cancel,
                session: Mutex::new(session),
            }),
        }
    }

    pub fn options(&self) -> &ThingOptions {
        &self.inner.options
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.inner.options.identity.as_ref()
    }

    /// Current connection state.
    ///
    /// Reports `Disconnected` once the transport drops its session, even if
    /// the transport never said so through [`OnConnectionLost`].
    pub fn connection_state(&self) -> ConnectionState {
        let state = *self.inner.connection_state.borrow();
        if state == ConnectionState::Connected && !self.transport_connected() {
            ConnectionState::Disconnected
        } else {
            state
        }
    }

    /// Subscribe to connection state changes, including sessions the
    /// transport loses or re-establishes on its own.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// True iff the current transport client exists and reports itself
    /// connected. A stale client left behind by a failed connect never counts.
    pub fn is_connected(&self) -> bool {
        self.live_client().is_some()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the given brokers.
    ///
    /// Returns immediately if already connected. Otherwise builds a fresh
    /// transport client, configures it with the client id, a token-backed
    /// credentials provider, the optional sinks and the config
    /// subscription, and waits for the transport to connect.
    pub async fn connect<I, S>(&self, cancel: &CancellationToken, brokers: I) -> Result<(), ThingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let brokers: Vec<String> = brokers.into_iter().map(Into::into).collect();
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.is_connected() {
            debug!("already connected");
            return Ok(());
        }

        let options = &self.inner.options;
        let identity = options
            .identity
            .as_ref()
            .ok_or(ThingError::Configuration { missing: "identity" })?;
        if let Some(field) = identity.first_empty_field() {
            return Err(ThingError::Configuration { missing: field });
        }
        let credentials = options
            .credentials
            .clone()
            .ok_or(ThingError::Configuration {
                missing: "credentials",
            })?;

        // A stale or lost session is torn down, never reused.
        if let Some(stale) = self.replace_client(None) {
            debug!("discarding stale transport client");
            self.current_session().cancel();
            if cancellable(cancel, teardown(stale.as_ref())).await.is_err() {
                debug!("stale transport teardown abandoned");
            }
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        let session = self.new_session();
        let client = self.build_client(identity, credentials, &session);
        self.replace_client(Some(Arc::clone(&client)));

        let result = cancellable(cancel, client.connect(cancel, &brokers))
            .await
            .and_then(|connected| connected.map_err(ThingError::from));

        match result {
            Ok(()) => {
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Connected);
                info!(client_id = %identity, brokers = ?brokers, "connected");
                self.inner.options.loggers.info(format_args!("Connected"));
                Ok(())
            }
            Err(err) => {
                // The transport may still finish this connect in the
                // background; the client stays reachable for teardown.
                session.cancel();
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Disconnected);
                teardown(client.as_ref()).await;
                warn!(client_id = %identity, error = %err, "connect failed");
                self.inner
                    .options
                    .loggers
                    .error(format_args!("Connect failed: {err}"));
                Err(err)
            }
        }
    }

    /// Disconnect from the brokers. Best-effort; never fails.
    ///
    /// The config subscription is dropped first; its failure is ignored so
    /// the transport is always torn down.
    pub async fn disconnect(&self, cancel: &CancellationToken) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let Some(client) = self.replace_client(None) else {
            return;
        };
        self.current_session().cancel();

        if client.is_connected() {
            if let Some(identity) = self.identity() {
                let config_topic = identity.config_topic();
                match cancellable(cancel, client.unsubscribe(cancel, &config_topic)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(topic = %config_topic, error = %e, "unsubscribe failed"),
                    Err(e) => debug!(topic = %config_topic, error = %e, "unsubscribe abandoned"),
                }
            }
            info!("disconnecting");
            self.inner.options.loggers.info(format_args!("Disconnecting"));
        }

        match cancellable(cancel, client.disconnect(cancel)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "transport disconnect failed (non-fatal)"),
            Err(e) => debug!(error = %e, "transport disconnect abandoned"),
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Publishing ───────────────────────────────────────────────

    /// Publish the current device state.
    pub async fn publish_state(
        &self,
        cancel: &CancellationToken,
        payload: impl Into<Bytes>,
    ) -> Result<(), ThingError> {
        let qos = self.inner.options.state_qos;
        self.publish::<&str>(cancel, TopicKind::State, &[], payload.into(), qos)
            .await
    }

    /// Publish a telemetry event, optionally under a hierarchy of sub-topics.
    pub async fn publish_event<S>(
        &self,
        cancel: &CancellationToken,
        payload: impl Into<Bytes>,
        segments: &[S],
    ) -> Result<(), ThingError>
    where
        S: AsRef<str> + Sync,
    {
        let qos = self.inner.options.event_qos;
        self.publish(cancel, TopicKind::Events, segments, payload.into(), qos)
            .await
    }

    async fn publish<S>(
        &self,
        cancel: &CancellationToken,
        kind: TopicKind,
        segments: &[S],
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), ThingError>
    where
        S: AsRef<str> + Sync,
    {
        cancellable(cancel, self.inner.gate.acquire()).await?;

        let Some(client) = self.live_client() else {
            return Err(ThingError::NotConnected);
        };
        let Some(identity) = self.identity() else {
            return Err(ThingError::NotConnected);
        };
        let topic = topic(kind, identity, segments);
        let len = payload.len();

        let result = cancellable(cancel, client.publish(cancel, &topic, qos, payload))
            .await
            .and_then(|sent| sent.map_err(|e| ThingError::from_publish(&topic, e)));

        let loggers = &self.inner.options.loggers;
        match &result {
            Ok(()) => {
                debug!(%topic, bytes = len, %qos, "published");
                loggers.debug(format_args!(
                    "SENT - Topic: {topic}, Message Length: {len} bytes"
                ));
            }
            Err(err) => {
                debug!(%topic, bytes = len, error = %err, "publish failed");
                loggers.debug(format_args!(
                    "SEND FAILED - Topic: {topic}, Message Length: {len} bytes, Error: {err}"
                ));
            }
        }
        result
    }

    // ── Internals ────────────────────────────────────────────────

    fn build_client(
        &self,
        identity: &Identity,
        credentials: Arc<Credentials>,
        session: &CancellationToken,
    ) -> Arc<dyn TransportClient> {
        let options = &self.inner.options;
        let settings = TransportSettings {
            credentials: Arc::clone(&credentials),
            queue: options.queue_store(),
        };
        let mut client = self.inner.factory.create(&settings);

        if options.log_mqtt {
            if let Some(sink) = &options.loggers.debug {
                client.set_debug_logger(Arc::clone(sink));
            }
            if let Some(sink) = &options.loggers.info {
                client.set_info_logger(Arc::clone(sink));
            }
            if let Some(sink) = &options.loggers.error {
                client.set_error_logger(Arc::clone(sink));
            }
        }

        client.set_client_id(identity.client_id());
        client.set_credentials_provider(Arc::new(TokenCredentials::new(
            credentials,
            identity.clone(),
            clamp_token_expiration(options.auth_token_expiration),
            options.loggers.clone(),
        )));

        let dispatcher = Arc::new(ConfigDispatcher::new(
            self.downgrade(),
            options.config_handler.clone(),
            options.loggers.clone(),
        ));
        let monitor = Arc::new(SessionMonitor {
            thing: self.downgrade(),
            session: session.clone(),
            subscriber: ConfigSubscriber::new(
                identity.config_topic(),
                options.config_qos,
                dispatcher,
                session.clone(),
                options.loggers.clone(),
            ),
        });
        let on_connect: Arc<dyn OnConnect> = monitor.clone();
        client.set_on_connect(on_connect);
        client.set_on_connection_lost(monitor);

        Arc::from(client)
    }

    /// The transport client publishes may use right now.
    fn live_client(&self) -> Option<Arc<dyn TransportClient>> {
        if *self.inner.connection_state.borrow() == ConnectionState::Disconnected {
            return None;
        }
        self.current_client().filter(|client| client.is_connected())
    }

    fn transport_connected(&self) -> bool {
        self.current_client()
            .is_some_and(|client| client.is_connected())
    }

    /// Move from `from` to `to`; returns whether the state changed.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.inner.connection_state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn downgrade(&self) -> WeakThing {
        WeakThing(Arc::downgrade(&self.inner))
    }

    fn current_client(&self) -> Option<Arc<dyn TransportClient>> {
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_client(
        &self,
        client: Option<Arc<dyn TransportClient>>,
    ) -> Option<Arc<dyn TransportClient>> {
        let mut slot = self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, client)
    }

    fn current_session(&self) -> CancellationToken {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn new_session(&self) -> CancellationToken {
        let session = self.inner.cancel.child_token();
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = session.clone();
        session
    }
}

impl fmt::Debug for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thing")
            .field("identity", &self.identity())
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

// ── Session monitor ──────────────────────────────────────────────

/// Installed on each transport client. Subscribes the config topic on every
/// (re)connect and mirrors transport-driven session changes into the
/// connection state. Inert once its session is cancelled.
struct SessionMonitor {
    thing: WeakThing,
    session: CancellationToken,
    subscriber: ConfigSubscriber,
}

impl SessionMonitor {
    fn live_thing(&self) -> Option<Thing> {
        if self.session.is_cancelled() {
            return None;
        }
        self.thing.upgrade()
    }
}

impl OnConnect for SessionMonitor {
    fn on_connect<'a>(&'a self, client: &'a dyn TransportClient) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.subscriber.on_connect(client).await;

            let Some(thing) = self.live_thing() else {
                return;
            };
            if thing.transition(ConnectionState::Disconnected, ConnectionState::Connected) {
                info!("reconnected");
                thing.inner.options.loggers.info(format_args!("Reconnected"));
            }
        })
    }
}

impl OnConnectionLost for SessionMonitor {
    fn on_connection_lost(&self, error: &TransportError) {
        let Some(thing) = self.live_thing() else {
            return;
        };
        if thing.transition(ConnectionState::Connected, ConnectionState::Disconnected) {
            warn!(%error, "connection lost");
            thing
                .inner
                .options
                .loggers
                .error(format_args!("Connection lost: {error}"));
        }
    }
}

/// Best-effort disconnect, bounded by [`TEARDOWN_TIMEOUT`].
async fn teardown(client: &dyn TransportClient) {
    let cancel = CancellationToken::new();
    match tokio::time::timeout(TEARDOWN_TIMEOUT, client.disconnect(&cancel)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "transport teardown failed"),
        Err(_) => debug!(timeout = ?TEARDOWN_TIMEOUT, "transport teardown timed out"),
    }
}

/// Race `fut` against `cancel`, preferring cancellation.
///
/// Dropping `fut` only stops the wait; work it already handed to the
/// transport may still complete.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, ThingError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ThingError::Cancelled),
        output = fut => Ok(output),
    }
}
