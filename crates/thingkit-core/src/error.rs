// ── Core error types ──
//
// What callers of `Thing` see. Transport failures that have no more
// specific meaning are surfaced verbatim through `Transport`.

use thiserror::Error;

use crate::token::TokenError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ThingError {
    /// Identity or credentials missing (or incomplete) at connect time.
    #[error("required configuration values are missing: {missing}")]
    Configuration { missing: &'static str },

    #[error("not connected")]
    NotConnected,

    /// Sent to the transport but no acknowledgement was obtained.
    #[error("could not publish message to {topic}: {source}")]
    PublishFailed {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// The caller's token was cancelled while the runtime was waiting.
    #[error("operation was cancelled or timed out")]
    Cancelled,

    /// The auth token could not be signed. Surfaces when the transport
    /// hands the credentials provider's `TokenError` back from `connect`.
    #[error(transparent)]
    Signing(#[from] TokenError),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ThingError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Other(source) => match source.downcast::<TokenError>() {
                Ok(token) => Self::Signing(*token),
                Err(source) => Self::Transport(TransportError::Other(source)),
            },
            err => Self::Transport(err),
        }
    }
}

impl ThingError {
    /// Classify a transport failure seen while publishing to `topic`.
    pub(crate) fn from_publish(topic: &str, err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::Cancelled => Self::Cancelled,
            err @ TransportError::Timeout(_) => Self::PublishFailed {
                topic: topic.to_owned(),
                source: err,
            },
            err @ TransportError::Other(_) => Self::from(err),
        }
    }

    /// Returns `true` if a later attempt could succeed without reconfiguration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::PublishFailed { .. } | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn publish_timeouts_become_publish_failed() {
        let err = ThingError::from_publish(
            "/devices/d/state",
            TransportError::Timeout(Duration::from_secs(1)),
        );
        assert!(
            matches!(err, ThingError::PublishFailed { ref topic, .. } if topic == "/devices/d/state")
        );
    }

    #[test]
    fn other_transport_errors_pass_through() {
        let err = ThingError::from_publish("t", TransportError::other("socket closed"));
        assert_eq!(err.to_string(), "socket closed");
        assert!(!err.is_transient());
    }

    #[test]
    fn token_errors_from_the_transport_become_signing() {
        let token = TokenError::Expiration(Duration::MAX);
        let err = ThingError::from(TransportError::other(token));
        assert!(matches!(err, ThingError::Signing(TokenError::Expiration(_))));
    }

    #[test]
    fn not_connected_and_cancelled_keep_their_meaning() {
        assert!(matches!(
            ThingError::from_publish("t", TransportError::NotConnected),
            ThingError::NotConnected
        ));
        assert!(matches!(
            ThingError::from_publish("t", TransportError::Cancelled),
            ThingError::Cancelled
        ));
    }
}
