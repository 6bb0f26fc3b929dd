// ── In-memory transport ──
//
// A transport that never touches the network. It records everything a
// `Thing` asks of it and lets tests inject inbound messages and failures.
// With an acknowledgement delay, connects and publishes take effect in a
// background task, so they still land after the caller stops waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::logging::LogSink;
use crate::token::TokenError;
use crate::transport::{
    CredentialsProvider, MessageHandler, MqttCredentials, OnConnect, OnConnectionLost, QoS,
    TransportClient, TransportError, TransportFactory, TransportSettings,
};

/// A failure the mock reports instead of succeeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    NotConnected,
    Timeout(Duration),
    Other(String),
}

impl MockFailure {
    fn to_error(&self) -> TransportError {
        match self {
            Self::NotConnected => TransportError::NotConnected,
            Self::Timeout(after) => TransportError::Timeout(*after),
            Self::Other(message) => TransportError::other(message.clone()),
        }
    }
}

/// A message handed to [`MockTransport::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    brokers: Vec<String>,
    connect_calls: usize,
    disconnect_calls: usize,
    client_id: Option<String>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    on_connect: Option<Arc<dyn OnConnect>>,
    on_connection_lost: Option<Arc<dyn OnConnectionLost>>,
    debug_logger: bool,
    info_logger: bool,
    error_logger: bool,
    subscriptions: HashMap<String, (QoS, Arc<dyn MessageHandler>)>,
    messages: Vec<PublishedMessage>,
    connect_failure: Option<MockFailure>,
    publish_failure: Option<MockFailure>,
    ack_delay: Option<Duration>,
}

/// Records calls made by a `Thing`. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn client_id(&self) -> Option<String> {
        self.state().client_id.clone()
    }

    pub fn brokers(&self) -> Vec<String> {
        self.state().brokers.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state().disconnect_calls
    }

    /// Ask the installed provider for credentials, as a reconnect would.
    pub fn credentials(&self) -> Option<Result<MqttCredentials, TokenError>> {
        let provider = self.state().credentials.clone();
        provider.map(|p| p.credentials())
    }

    /// `(debug, info, error)` logger presence.
    pub fn loggers_installed(&self) -> (bool, bool, bool) {
        let state = self.state();
        (state.debug_logger, state.info_logger, state.error_logger)
    }

    pub fn subscription(&self, topic: &str) -> Option<QoS> {
        self.state().subscriptions.get(topic).map(|(qos, _)| *qos)
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state().messages.clone()
    }

    // ── Control ──────────────────────────────────────────────────

    pub fn fail_connect(&self, failure: Option<MockFailure>) {
        self.state().connect_failure = failure;
    }

    pub fn fail_publish(&self, failure: Option<MockFailure>) {
        self.state().publish_failure = failure;
    }

    /// Connects and publishes complete `delay` after they are issued.
    pub fn delay_acks(&self, delay: Option<Duration>) {
        self.state().ack_delay = delay;
    }

    /// Drop the session and report it through the connection-lost hook.
    pub fn lose_connection(&self) {
        let handler = {
            let mut state = self.state();
            state.connected = false;
            state.on_connection_lost.clone()
        };
        if let Some(handler) = handler {
            handler.on_connection_lost(&TransportError::other("connection reset by broker"));
        }
    }

    /// Drop the session without reporting it.
    pub fn lose_connection_unreported(&self) {
        self.state().connected = false;
    }

    /// Re-establish a lost session as the transport's own reconnect would.
    pub async fn restore_connection(&self) {
        self.complete_connect().await;
    }

    async fn complete_connect(&self) {
        let on_connect = {
            let mut state = self.state();
            state.connected = true;
            state.on_connect.clone()
        };
        if let Some(on_connect) = on_connect {
            on_connect.on_connect(self).await;
        }
    }

    /// Deliver `payload` on `topic` as if it arrived from the broker.
    ///
    /// Returns `false` when nothing is subscribed to `topic`.
    pub async fn receive(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let handler = self
            .state()
            .subscriptions
            .get(topic)
            .map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => {
                handler.on_message(topic, payload.into()).await;
                true
            }
            None => false,
        }
    }
}

impl TransportClient for MockTransport {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn connect<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        brokers: &'a [String],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let (provider, delay) = {
                let mut state = self.state();
                state.connect_calls += 1;
                state.brokers = brokers.to_vec();
                if let Some(failure) = &state.connect_failure {
                    return Err(failure.to_error());
                }
                (state.credentials.clone(), state.ack_delay)
            };

            // Credentials are requested per attempt, as a broker login would.
            if let Some(provider) = provider {
                provider.credentials().map_err(TransportError::other)?;
            }

            match delay {
                None => self.complete_connect().await,
                Some(delay) => {
                    let transport = self.clone();
                    let (done, acked) = oneshot::channel();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        transport.complete_connect().await;
                        let _ = done.send(());
                    });
                    let _ = acked.await;
                }
            }
            Ok(())
        })
    }

    fn disconnect<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.disconnect_calls += 1;
            state.connected = false;
            state.subscriptions.clear();
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        topic: &'a str,
        qos: QoS,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let delay = {
                let state = self.state();
                if !state.connected {
                    return Err(TransportError::NotConnected);
                }
                if let Some(failure) = &state.publish_failure {
                    return Err(failure.to_error());
                }
                state.ack_delay
            };
            let message = PublishedMessage {
                topic: topic.to_owned(),
                qos,
                payload,
            };

            match delay {
                None => self.state().messages.push(message),
                Some(delay) => {
                    let transport = self.clone();
                    let (done, acked) = oneshot::channel();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        transport.state().messages.push(message);
                        let _ = done.send(());
                    });
                    let _ = acked.await;
                }
            }
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        topic: &'a str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.subscriptions.insert(topic.to_owned(), (qos, handler));
            Ok(())
        })
    }

    fn unsubscribe<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.state().subscriptions.remove(topic);
            Ok(())
        })
    }

    fn set_client_id(&mut self, client_id: String) {
        self.state().client_id = Some(client_id);
    }

    fn set_credentials_provider(&mut self, provider: Arc<dyn CredentialsProvider>) {
        self.state().credentials = Some(provider);
    }

    fn set_on_connect(&mut self, handler: Arc<dyn OnConnect>) {
        self.state().on_connect = Some(handler);
    }

    fn set_on_connection_lost(&mut self, handler: Arc<dyn OnConnectionLost>) {
        self.state().on_connection_lost = Some(handler);
    }

    fn set_debug_logger(&mut self, _sink: Arc<dyn LogSink>) {
        self.state().debug_logger = true;
    }

    fn set_info_logger(&mut self, _sink: Arc<dyn LogSink>) {
        self.state().info_logger = true;
    }

    fn set_error_logger(&mut self, _sink: Arc<dyn LogSink>) {
        self.state().error_logger = true;
    }
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Default)]
struct FactoryState {
    created: Vec<MockTransport>,
    settings: Vec<TransportSettings>,
    connect_failure: Option<MockFailure>,
    ack_delay: Option<Duration>,
}

/// Hands out [`MockTransport`]s and keeps a handle to each one.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transports created from now on fail to connect with `failure`.
    pub fn fail_connect(&self, failure: Option<MockFailure>) {
        self.state().connect_failure = failure;
    }

    /// Transports created from now on acknowledge after `delay`.
    pub fn delay_acks(&self, delay: Option<Duration>) {
        self.state().ack_delay = delay;
    }

    pub fn created(&self) -> usize {
        self.state().created.len()
    }

    pub fn transports(&self) -> Vec<MockTransport> {
        self.state().created.clone()
    }

    pub fn last(&self) -> Option<MockTransport> {
        self.state().created.last().cloned()
    }

    pub fn last_settings(&self) -> Option<TransportSettings> {
        self.state().settings.last().cloned()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, settings: &TransportSettings) -> Box<dyn TransportClient> {
        let mut state = self.state();
        let transport = MockTransport::new();
        transport.fail_connect(state.connect_failure.clone());
        transport.delay_acks(state.ack_delay);
        state.created.push(transport.clone());
        state.settings.push(settings.clone());
        Box::new(transport)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_requires_connection() {
        let transport = MockTransport::new();
        let cancel = CancellationToken::new();

        let err = transport
            .publish(&cancel, "t", QoS::AtLeastOnce, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        transport.connect(&cancel, &["b".to_owned()]).await.unwrap();
        transport
            .publish(&cancel, "t", QoS::AtLeastOnce, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(transport.messages().len(), 1);
    }

    #[tokio::test]
    async fn injected_connect_failure_is_reported() {
        let transport = MockTransport::new();
        transport.fail_connect(Some(MockFailure::Other("refused".into())));

        let err = transport
            .connect(&CancellationToken::new(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");
        assert!(!transport.is_connected());
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_publish_lands_after_caller_gives_up() {
        let transport = MockTransport::new();
        let cancel = CancellationToken::new();
        transport.connect(&cancel, &[]).await.unwrap();
        transport.delay_acks(Some(Duration::from_secs(1)));

        let pending = transport.publish(&cancel, "t", QoS::AtMostOnce, Bytes::from_static(b"x"));
        let waited = tokio::time::timeout(Duration::from_millis(100), pending).await;
        assert!(waited.is_err());
        assert!(transport.messages().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.messages().len(), 1);
    }

    #[tokio::test]
    async fn receive_without_subscription_is_dropped() {
        let transport = MockTransport::new();
        assert!(!transport.receive("/devices/d/config", "{}").await);
    }
}
