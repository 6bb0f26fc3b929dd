// ── Device credentials ──
//
// The long-lived key pair of a device. The signing algorithm is fixed
// when the credentials are built: an RSA key always signs RS256 and an
// EC key always signs ES256. Nothing here touches the filesystem.

use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};

use crate::token::{Claims, TokenError};

/// Key type of the device key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ec,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
        })
    }
}

/// Public certificate plus key material for transport-level (TLS) authentication.
///
/// Carried opaquely to the transport factory; the core never parses it.
#[derive(Debug)]
pub struct Certificate {
    certificate_pem: Vec<u8>,
    private_key_pem: SecretSlice<u8>,
}

impl Certificate {
    pub fn new(certificate_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            certificate_pem: certificate_pem.into(),
            private_key_pem: SecretSlice::from(private_key_pem.into()),
        }
    }

    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        self.private_key_pem.expose_secret()
    }
}

/// Token signing capability, one variant per supported key type.
#[derive(Clone)]
pub enum Signer {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    Rs256(EncodingKey),
    /// ECDSA P-256 with SHA-256.
    Es256(EncodingKey),
}

impl Signer {
    /// Parse a PEM private key for the given key type.
    ///
    /// RSA keys may be PKCS#1 or PKCS#8; EC keys must be PKCS#8.
    pub fn from_pem(key_type: KeyType, pem: &[u8]) -> Result<Self, TokenError> {
        let parsed = match key_type {
            KeyType::Rsa => EncodingKey::from_rsa_pem(pem).map(Self::Rs256),
            KeyType::Ec => EncodingKey::from_ec_pem(pem).map(Self::Es256),
        };
        parsed.map_err(|source| TokenError::InvalidKey { key_type, source })
    }

    /// Wrap a DER private key (PKCS#1 for RSA, PKCS#8 for EC).
    ///
    /// DER input is not validated until the first signature.
    pub fn from_der(key_type: KeyType, der: &[u8]) -> Self {
        match key_type {
            KeyType::Rsa => Self::Rs256(EncodingKey::from_rsa_der(der)),
            KeyType::Ec => Self::Es256(EncodingKey::from_ec_der(der)),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rs256(_) => KeyType::Rsa,
            Self::Es256(_) => KeyType::Ec,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Rs256(_) => Algorithm::RS256,
            Self::Es256(_) => Algorithm::ES256,
        }
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = match self {
            Self::Rs256(key) | Self::Es256(key) => key,
        };
        jsonwebtoken::encode(&Header::new(self.algorithm()), claims, key)
            .map_err(TokenError::Signing)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signer")
            .field(&self.algorithm())
            .field(&"[REDACTED]")
            .finish()
    }
}

/// The device's key pair: a TLS certificate and a token signer.
#[derive(Debug)]
pub struct Credentials {
    certificate: Certificate,
    signer: Signer,
}

impl Credentials {
    /// Build credentials, parsing `private_key_pem` as a signing key of `key_type`.
    pub fn new(
        key_type: KeyType,
        certificate: Certificate,
        private_key_pem: &[u8],
    ) -> Result<Self, TokenError> {
        let signer = Signer::from_pem(key_type, private_key_pem)?;
        Ok(Self::from_signer(certificate, signer))
    }

    pub fn rsa(certificate: Certificate, private_key_pem: &[u8]) -> Result<Self, TokenError> {
        Self::new(KeyType::Rsa, certificate, private_key_pem)
    }

    pub fn ec(certificate: Certificate, private_key_pem: &[u8]) -> Result<Self, TokenError> {
        Self::new(KeyType::Ec, certificate, private_key_pem)
    }

    pub fn from_signer(certificate: Certificate, signer: Signer) -> Self {
        Self {
            certificate,
            signer,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.signer.key_type()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pem_key() {
        let cert = Certificate::new(Vec::new(), Vec::new());
        let err = Credentials::rsa(cert, b"definitely not a key").unwrap_err();
        assert!(matches!(
            err,
            TokenError::InvalidKey {
                key_type: KeyType::Rsa,
                ..
            }
        ));
    }

    #[test]
    fn der_signer_selects_algorithm_from_key_type() {
        assert_eq!(
            Signer::from_der(KeyType::Rsa, &[]).algorithm(),
            Algorithm::RS256
        );
        assert_eq!(
            Signer::from_der(KeyType::Ec, &[]).algorithm(),
            Algorithm::ES256
        );
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let signer = Signer::from_der(KeyType::Ec, b"secret-bytes");
        let rendered = format!("{signer:?}");
        assert!(rendered.contains("ES256"));
        assert!(!rendered.contains("secret"));
    }
}
