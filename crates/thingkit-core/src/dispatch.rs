// ── Configuration dispatch ──
//
// On every (re)connect the transport calls `ConfigSubscriber`, which
// subscribes the config topic and routes deliveries through
// `ConfigDispatcher` to the caller's `ConfigHandler`. Delivery is
// at-least-once; nothing here orders or deduplicates messages.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::logging::LogSinks;
use crate::thing::{Thing, WeakThing};
use crate::transport::{MessageHandler, OnConnect, QoS, TransportClient, TransportError};

/// Receives configuration documents pushed to the device.
///
/// The handler may publish through `thing` (typically an updated state)
/// before returning.
pub trait ConfigHandler: Send + Sync {
    fn on_config<'a>(&'a self, thing: &'a Thing, payload: Bytes) -> BoxFuture<'a, ()>;
}

impl<F, Fut> ConfigHandler for F
where
    F: Fn(Thing, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_config<'a>(&'a self, thing: &'a Thing, payload: Bytes) -> BoxFuture<'a, ()> {
        Box::pin(self(thing.clone(), payload))
    }
}

pub(crate) struct ConfigDispatcher {
    thing: WeakThing,
    handler: Option<Arc<dyn ConfigHandler>>,
    loggers: LogSinks,
}

impl ConfigDispatcher {
    pub(crate) fn new(
        thing: WeakThing,
        handler: Option<Arc<dyn ConfigHandler>>,
        loggers: LogSinks,
    ) -> Self {
        Self {
            thing,
            handler,
            loggers,
        }
    }
}

impl MessageHandler for ConfigDispatcher {
    fn on_message(&self, topic: &str, payload: Bytes) -> BoxFuture<'static, ()> {
        debug!(topic, bytes = payload.len(), "received configuration");
        self.loggers.debug(format_args!(
            "RECEIVED - Topic: {topic}, Message Length: {} bytes",
            payload.len()
        ));

        let thing = self.thing.upgrade();
        let handler = self.handler.clone();
        Box::pin(async move {
            // The Thing may already be gone if the transport outlived it.
            let (Some(thing), Some(handler)) = (thing, handler) else {
                return;
            };
            handler.on_config(&thing, payload).await;
        })
    }
}

/// Subscribes the config topic whenever the transport (re)connects.
pub(crate) struct ConfigSubscriber {
    topic: String,
    qos: QoS,
    dispatcher: Arc<ConfigDispatcher>,
    session: CancellationToken,
    loggers: LogSinks,
}

impl ConfigSubscriber {
    pub(crate) fn new(
        topic: String,
        qos: QoS,
        dispatcher: Arc<ConfigDispatcher>,
        session: CancellationToken,
        loggers: LogSinks,
    ) -> Self {
        Self {
            topic,
            qos,
            dispatcher,
            session,
            loggers,
        }
    }
}

impl OnConnect for ConfigSubscriber {
    fn on_connect<'a>(&'a self, client: &'a dyn TransportClient) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let handler: Arc<dyn MessageHandler> = self.dispatcher.clone();
            let result = tokio::select! {
                biased;
                () = self.session.cancelled() => Err(TransportError::Cancelled),
                result = client.subscribe(&self.session, &self.topic, self.qos, handler) => result,
            };

            match result {
                Ok(()) => debug!(topic = %self.topic, qos = %self.qos, "subscribed to configuration"),
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "configuration subscribe failed");
                    self.loggers.error(format_args!(
                        "Subscribe to {} failed: {e}",
                        self.topic
                    ));
                }
            }
        })
    }
}
