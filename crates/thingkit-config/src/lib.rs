//! Process-level configuration for a thingkit device.
//!
//! A TOML file layered with `THINGKIT_` environment variables, key and
//! certificate loading from disk, and translation to
//! `thingkit_core::ThingOptions`. Log sinks and the config handler are
//! attached by the caller afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use thingkit_core::{
    Certificate, Credentials, DEFAULT_PUBLISH_INTERVAL, DEFAULT_TOKEN_EXPIRATION, Identity,
    KeyType, QoS, ThingOptions, TokenError,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid device credentials: {0}")]
    Credentials(#[from] TokenError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThingConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Broker addresses, e.g. `ssl://mqtt.googleapis.com:8883`.
    #[serde(default)]
    pub brokers: Vec<String>,

    /// Route transport-internal logs through the caller's sinks.
    #[serde(default)]
    pub log_mqtt: bool,

    /// Offline queue location; unset keeps the queue in memory.
    pub queue_directory: Option<PathBuf>,

    #[serde(default = "default_config_qos")]
    pub config_qos: u8,

    #[serde(default = "default_publish_qos")]
    pub state_qos: u8,

    #[serde(default = "default_publish_qos")]
    pub event_qos: u8,

    /// Token lifetime in seconds; clamped to `[600, 86400]` on connect.
    #[serde(default = "default_token_expiration")]
    pub auth_token_expiration_secs: u64,

    /// Minimum spacing between publishes, in milliseconds.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
}

impl Default for ThingConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            credentials: CredentialsConfig::default(),
            brokers: Vec::new(),
            log_mqtt: false,
            queue_directory: None,
            config_qos: default_config_qos(),
            state_qos: default_publish_qos(),
            event_qos: default_publish_qos(),
            auth_token_expiration_secs: default_token_expiration(),
            publish_interval_ms: default_publish_interval(),
        }
    }
}

fn default_config_qos() -> u8 {
    QoS::ExactlyOnce.into()
}
fn default_publish_qos() -> u8 {
    QoS::AtLeastOnce.into()
}
fn default_token_expiration() -> u64 {
    DEFAULT_TOKEN_EXPIRATION.as_secs()
}
fn default_publish_interval() -> u64 {
    u64::try_from(DEFAULT_PUBLISH_INTERVAL.as_millis()).unwrap_or(2_000)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub device_id: String,
}

impl From<IdentityConfig> for Identity {
    fn from(cfg: IdentityConfig) -> Self {
        Identity::new(cfg.project_id, cfg.location, cfg.registry, cfg.device_id)
    }
}

/// Paths to the device key pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,

    /// PEM certificate presented to the broker.
    #[serde(default)]
    pub certificate: PathBuf,

    /// PEM private key; signs the auth tokens.
    #[serde(default)]
    pub private_key: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            key_type: default_key_type(),
            certificate: PathBuf::new(),
            private_key: PathBuf::new(),
        }
    }
}

fn default_key_type() -> KeyType {
    KeyType::Rsa
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "thingkit", "thingkit").map_or_else(
        || PathBuf::from("thingkit.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate the config from the default path and environment.
pub fn load() -> Result<ThingConfig, ConfigError> {
    load_from(&config_path())
}

/// Load and validate the config from `path` layered with the environment.
///
/// A missing file is not an error; its values simply come from defaults
/// and `THINGKIT_*` variables (nested keys split on `__`).
pub fn load_from(path: &Path) -> Result<ThingConfig, ConfigError> {
    let config: ThingConfig = Figment::new()
        .merge(Serialized::defaults(ThingConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("THINGKIT_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

impl ThingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let identity = &self.identity;
        for (field, value) in [
            ("identity.project_id", &identity.project_id),
            ("identity.location", &identity.location),
            ("identity.registry", &identity.registry),
            ("identity.device_id", &identity.device_id),
        ] {
            if value.is_empty() {
                return Err(ConfigError::validation(field, "must not be empty"));
            }
        }

        if self.brokers.is_empty() || self.brokers.iter().any(String::is_empty) {
            return Err(ConfigError::validation(
                "brokers",
                "at least one broker address is required",
            ));
        }

        for (field, path) in [
            ("credentials.certificate", &self.credentials.certificate),
            ("credentials.private_key", &self.credentials.private_key),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::validation(field, "path must be set"));
            }
        }

        for (field, level) in [
            ("config_qos", self.config_qos),
            ("state_qos", self.state_qos),
            ("event_qos", self.event_qos),
        ] {
            QoS::try_from(level).map_err(|e| ConfigError::validation(field, e.to_string()))?;
        }

        Ok(())
    }

    pub fn identity(&self) -> Identity {
        self.identity.clone().into()
    }

    /// Read the key files and build core options.
    pub fn into_options(self) -> Result<ThingOptions, ConfigError> {
        self.validate()?;
        let credentials = load_credentials(
            self.credentials.key_type,
            &self.credentials.certificate,
            &self.credentials.private_key,
        )?;
        let qos = |field: &str, level: u8| {
            QoS::try_from(level).map_err(|e| ConfigError::validation(field, e.to_string()))
        };

        Ok(ThingOptions {
            config_qos: qos("config_qos", self.config_qos)?,
            state_qos: qos("state_qos", self.state_qos)?,
            event_qos: qos("event_qos", self.event_qos)?,
            log_mqtt: self.log_mqtt,
            queue_directory: self.queue_directory,
            auth_token_expiration: Duration::from_secs(self.auth_token_expiration_secs),
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            ..ThingOptions::new(self.identity.into(), Arc::new(credentials))
        })
    }

    /// Serialize to TOML and write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Credential loading ──────────────────────────────────────────────

/// Load an RSA key pair from PEM files.
pub fn load_rsa_credentials(
    certificate_path: &Path,
    private_key_path: &Path,
) -> Result<Credentials, ConfigError> {
    load_credentials(KeyType::Rsa, certificate_path, private_key_path)
}

/// Load an EC (P-256) key pair from PEM files. The key must be PKCS#8.
pub fn load_ec_credentials(
    certificate_path: &Path,
    private_key_path: &Path,
) -> Result<Credentials, ConfigError> {
    load_credentials(KeyType::Ec, certificate_path, private_key_path)
}

pub fn load_credentials(
    key_type: KeyType,
    certificate_path: &Path,
    private_key_path: &Path,
) -> Result<Credentials, ConfigError> {
    let certificate_pem = read(certificate_path)?;
    let private_key_pem = read(private_key_path)?;
    let signer = thingkit_core::Signer::from_pem(key_type, &private_key_pem)?;
    Ok(Credentials::from_signer(
        Certificate::new(certificate_pem, private_key_pem),
        signer,
    ))
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    const EC_KEY: &[u8] = include_bytes!("../../thingkit-core/tests/fixtures/ec_private.pem");
    const EC_CERT: &[u8] = include_bytes!("../../thingkit-core/tests/fixtures/ec_cert.pem");
    const RSA_KEY: &[u8] = include_bytes!("../../thingkit-core/tests/fixtures/rsa_private.pem");
    const RSA_CERT: &[u8] = include_bytes!("../../thingkit-core/tests/fixtures/rsa_cert.pem");

    const DEVICE_TOML: &str = r#"
brokers = ["ssl://mqtt.example.com:8883"]
state_qos = 0

[identity]
project_id = "my-project"
location = "us-central1"
registry = "my-registry"
device_id = "my-device"

[credentials]
key_type = "ec"
certificate = "ec_cert.pem"
private_key = "ec_private.pem"
"#;

    fn jail_error(err: ConfigError) -> figment::Error {
        err.to_string().into()
    }

    #[test]
    fn loads_file_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("thing.toml", DEVICE_TOML)?;
            let config = load_from(Path::new("thing.toml")).map_err(jail_error)?;

            assert_eq!(config.identity.device_id, "my-device");
            assert_eq!(config.credentials.key_type, KeyType::Ec);
            assert_eq!(config.state_qos, 0);
            assert_eq!(config.event_qos, 1);
            assert_eq!(config.config_qos, 2);
            assert_eq!(config.auth_token_expiration_secs, 3600);
            assert_eq!(config.publish_interval_ms, 2000);
            assert_eq!(config.queue_directory, None);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("thing.toml", DEVICE_TOML)?;
            jail.set_env("THINGKIT_IDENTITY__DEVICE_ID", "from-env");
            jail.set_env("THINGKIT_LOG_MQTT", "true");
            let config = load_from(Path::new("thing.toml")).map_err(jail_error)?;

            assert_eq!(config.identity.device_id, "from-env");
            assert!(config.log_mqtt);
            Ok(())
        });
    }

    #[test]
    fn rejects_empty_identity_field() {
        Jail::expect_with(|jail| {
            jail.create_file("thing.toml", &DEVICE_TOML.replace("my-registry", ""))?;
            let err = load_from(Path::new("thing.toml")).unwrap_err();
            assert!(
                matches!(err, ConfigError::Validation { ref field, .. } if field == "identity.registry")
            );
            Ok(())
        });
    }

    #[test]
    fn rejects_missing_brokers_and_bad_qos() {
        let mut config = ThingConfig {
            identity: IdentityConfig {
                project_id: "p".into(),
                location: "l".into(),
                registry: "r".into(),
                device_id: "d".into(),
            },
            credentials: CredentialsConfig {
                key_type: KeyType::Rsa,
                certificate: "cert.pem".into(),
                private_key: "key.pem".into(),
            },
            ..ThingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "brokers"));

        config.brokers = vec!["tcp://localhost:1883".into()];
        config.validate().unwrap();

        config.event_qos = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "event_qos"));
    }

    #[test]
    fn into_options_reads_key_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ec_cert.pem"), EC_CERT).unwrap();
        std::fs::write(dir.path().join("ec_private.pem"), EC_KEY).unwrap();

        let config = ThingConfig {
            identity: IdentityConfig {
                project_id: "p".into(),
                location: "l".into(),
                registry: "r".into(),
                device_id: "d".into(),
            },
            credentials: CredentialsConfig {
                key_type: KeyType::Ec,
                certificate: dir.path().join("ec_cert.pem"),
                private_key: dir.path().join("ec_private.pem"),
            },
            brokers: vec!["ssl://mqtt.example.com:8883".into()],
            queue_directory: Some(dir.path().join("queue")),
            publish_interval_ms: 250,
            ..ThingConfig::default()
        };

        let options = config.into_options().unwrap();
        assert_eq!(options.identity, Some(Identity::new("p", "l", "r", "d")));
        assert_eq!(
            options.credentials.as_ref().map(|c| c.key_type()),
            Some(KeyType::Ec)
        );
        assert_eq!(options.config_qos, QoS::ExactlyOnce);
        assert_eq!(options.publish_interval, Duration::from_millis(250));
        assert_eq!(options.queue_directory, Some(dir.path().join("queue")));
    }

    #[test]
    fn loaders_report_missing_files_and_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("rsa_cert.pem");
        let key = dir.path().join("rsa_private.pem");
        std::fs::write(&cert, RSA_CERT).unwrap();

        let err = load_rsa_credentials(&cert, &key).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if *path == key));

        std::fs::write(&key, RSA_KEY).unwrap();
        let credentials = load_rsa_credentials(&cert, &key).unwrap();
        assert_eq!(credentials.key_type(), KeyType::Rsa);
        assert_eq!(credentials.certificate().certificate_pem(), RSA_CERT);

        let err = load_ec_credentials(&cert, &key).unwrap_err();
        assert!(matches!(err, ConfigError::Credentials(_)));
    }

    #[test]
    fn saved_config_loads_back() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join("thing.toml");
            let config = ThingConfig {
                identity: IdentityConfig {
                    project_id: "p".into(),
                    location: "l".into(),
                    registry: "r".into(),
                    device_id: "d".into(),
                },
                credentials: CredentialsConfig {
                    key_type: KeyType::Ec,
                    certificate: "c.pem".into(),
                    private_key: "k.pem".into(),
                },
                brokers: vec!["tcp://localhost:1883".into()],
                ..ThingConfig::default()
            };
            config.save_to(&path).map_err(jail_error)?;

            let loaded = load_from(&path).map_err(jail_error)?;
            assert_eq!(loaded, config);
            Ok(())
        });
    }
}
