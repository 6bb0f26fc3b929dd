// ── Bearer token generation ──
//
// Short-lived signed claims presented as the password on every
// connection attempt. Tokens are issued on demand and never cached.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::credentials::{Credentials, KeyType};
use crate::identity::Identity;
use crate::logging::LogSinks;
use crate::transport::{CredentialsProvider, MqttCredentials};

/// Username sent alongside the token; the broker ignores it.
pub const TOKEN_USERNAME: &str = "unused";

/// Token lifetime used when none is configured.
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(60 * 60);
/// Shortest lifetime accepted by [`clamp_token_expiration`].
pub const MIN_TOKEN_EXPIRATION: Duration = Duration::from_secs(10 * 60);
/// Longest lifetime accepted by [`clamp_token_expiration`].
pub const MAX_TOKEN_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid {key_type} private key: {source}")]
    InvalidKey {
        key_type: KeyType,
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("failed to sign auth token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("auth token expiration of {0:?} cannot be represented")]
    Expiration(Duration),
}

/// Bring a configured lifetime into `[10m, 24h]`; zero selects the 1h default.
pub fn clamp_token_expiration(expiration: Duration) -> Duration {
    if expiration.is_zero() {
        DEFAULT_TOKEN_EXPIRATION
    } else {
        expiration.clamp(MIN_TOKEN_EXPIRATION, MAX_TOKEN_EXPIRATION)
    }
}

/// Registered claims carried by a bearer token. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

/// A signed, encoded token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct BearerToken {
    claims: Claims,
    encoded: SecretString,
}

impl BearerToken {
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn audience(&self) -> &str {
        &self.claims.aud
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.exp, 0)
    }

    /// `exp - iat`.
    pub fn lifetime(&self) -> Duration {
        let secs = self.claims.exp.saturating_sub(self.claims.iat);
        Duration::from_secs(u64::try_from(secs).unwrap_or_default())
    }

    /// The compact JWS serialization.
    pub fn encoded(&self) -> &str {
        self.encoded.expose_secret()
    }

    pub fn into_secret(self) -> SecretString {
        self.encoded
    }
}

/// Issue a token for `identity`, valid for `expiration` (1h when zero).
///
/// The audience is the project id; the signature scheme follows the
/// credentials' key type.
pub fn issue_token(
    credentials: &Credentials,
    identity: &Identity,
    expiration: Duration,
) -> Result<BearerToken, TokenError> {
    let interval = if expiration.is_zero() {
        DEFAULT_TOKEN_EXPIRATION
    } else {
        expiration
    };
    let lifetime =
        i64::try_from(interval.as_secs()).map_err(|_| TokenError::Expiration(interval))?;

    let issued_at = Utc::now().timestamp();
    let expires_at = issued_at
        .checked_add(lifetime)
        .ok_or(TokenError::Expiration(interval))?;

    let claims = Claims {
        iat: issued_at,
        exp: expires_at,
        aud: identity.project_id.clone(),
    };
    let encoded = credentials.signer().sign(&claims)?;
    tracing::debug!(
        aud = %claims.aud,
        iat = claims.iat,
        exp = claims.exp,
        algorithm = ?credentials.signer().algorithm(),
        "issued auth token"
    );

    Ok(BearerToken {
        claims,
        encoded: SecretString::from(encoded),
    })
}

/// Issues a fresh token on every connection attempt.
///
/// Attempts are serialized, so two signatures for the same device never
/// run at once.
pub struct TokenCredentials {
    credentials: Arc<Credentials>,
    identity: Identity,
    expiration: Duration,
    loggers: LogSinks,
    signing: Mutex<()>,
}

impl TokenCredentials {
    pub fn new(
        credentials: Arc<Credentials>,
        identity: Identity,
        expiration: Duration,
        loggers: LogSinks,
    ) -> Self {
        Self {
            credentials,
            identity,
            expiration,
            loggers,
            signing: Mutex::new(()),
        }
    }

    pub fn issue(&self) -> Result<BearerToken, TokenError> {
        let _signing = self.signing.lock().unwrap_or_else(PoisonError::into_inner);
        issue_token(&self.credentials, &self.identity, self.expiration)
    }
}

impl CredentialsProvider for TokenCredentials {
    fn credentials(&self) -> Result<MqttCredentials, TokenError> {
        match self.issue() {
            Ok(token) => {
                self.loggers
                    .debug(format_args!("Auth Token: {:?}", token.claims()));
                Ok(MqttCredentials {
                    username: TOKEN_USERNAME.to_owned(),
                    password: token.into_secret(),
                })
            }
            Err(e) => {
                error!(device = %self.identity.device_id, error = %e, "failed to generate auth token");
                self.loggers
                    .error(format_args!("Error generating auth token: {e}"));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_expiration_uses_default() {
        assert_eq!(
            clamp_token_expiration(Duration::ZERO),
            DEFAULT_TOKEN_EXPIRATION
        );
    }

    #[test]
    fn expiration_is_clamped_to_bounds() {
        assert_eq!(
            clamp_token_expiration(Duration::from_secs(5)),
            MIN_TOKEN_EXPIRATION
        );
        assert_eq!(
            clamp_token_expiration(Duration::from_secs(48 * 60 * 60)),
            MAX_TOKEN_EXPIRATION
        );
        let inside = Duration::from_secs(2 * 60 * 60);
        assert_eq!(clamp_token_expiration(inside), inside);
    }

    #[test]
    fn claims_carry_only_registered_fields() {
        let claims = Claims {
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            aud: "my-project".into(),
        };
        assert_eq!(
            serde_json::to_value(&claims).ok(),
            Some(serde_json::json!({
                "iat": 1_700_000_000_i64,
                "exp": 1_700_003_600_i64,
                "aud": "my-project",
            }))
        );
    }

    #[test]
    fn lifetime_is_exp_minus_iat() {
        let token = BearerToken {
            claims: Claims {
                iat: 1_000,
                exp: 4_600,
                aud: "p".into(),
            },
            encoded: SecretString::from("x".to_string()),
        };
        assert_eq!(token.lifetime(), Duration::from_secs(3_600));
        assert_eq!(token.audience(), "p");
        assert_eq!(token.issued_at().map(|t| t.timestamp()), Some(1_000));
    }
}
