// src/config.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::rabbitmq::errors::{RabbitMQError, Result};

pub const DEFAULT_URL: &str = "amqps://localhost:5671";

/// Everything needed to open a client-certificate authenticated connection.
///
/// All five fields must be non-empty before any connect attempt; see
/// [`ConnectionParams::validate`].
#[derive(Clone, Default)]
pub struct ConnectionParams {
    pub url: String,
    pub client_cert: String,
    pub client_key: String,
    pub ca_cert: String,
    pub passphrase: String,
}

impl ConnectionParams {
    pub fn new(
        url: impl Into<String>,
        client_cert: impl Into<String>,
        client_key: impl Into<String>,
        ca_cert: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
            ca_cert: ca_cert.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Fails on the first empty field. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("broker url", &self.url),
            ("client certificate", &self.client_cert),
            ("client private key", &self.client_key),
            ("CA certificate", &self.ca_cert),
            ("private key passphrase", &self.passphrase),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(RabbitMQError::Configuration(format!(
                    "{} is not defined",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Broker URL with any `user:password@` section removed, for logging.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}{}", &self.url[..scheme_end + 3], &self.url[at + 1..])
            }
            _ => self.url.clone(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn presence(value: &str) -> &'static str {
            if value.is_empty() {
                "<missing>"
            } else {
                "<redacted>"
            }
        }

        f.debug_struct("ConnectionParams")
            .field("url", &self.redacted_url())
            .field("client_cert", &presence(&self.client_cert))
            .field("client_key", &presence(&self.client_key))
            .field("ca_cert", &presence(&self.ca_cert))
            .field("passphrase", &presence(&self.passphrase))
            .finish()
    }
}

/// How the publisher obtains its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishStrategy {
    /// Open a connection and channel per publish and close both afterwards.
    #[default]
    Dedicated,
    /// Publish over the process-wide channel singleton.
    Shared,
}

impl FromStr for PublishStrategy {
    type Err = RabbitMQError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedicated" => Ok(PublishStrategy::Dedicated),
            "shared" => Ok(PublishStrategy::Shared),
            other => Err(RabbitMQError::Configuration(format!(
                "unknown publish strategy '{}'",
                other
            ))),
        }
    }
}

/// What to do with a delivery that could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Acknowledge and drop.
    Ack,
    /// Negative-acknowledge and ask the broker to redeliver.
    Requeue,
    /// Negative-acknowledge without requeue.
    Discard,
}

impl FromStr for FailureAction {
    type Err = RabbitMQError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ack" => Ok(FailureAction::Ack),
            "requeue" => Ok(FailureAction::Requeue),
            "discard" => Ok(FailureAction::Discard),
            other => Err(RabbitMQError::Configuration(format!(
                "unknown failure action '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    pub on_malformed: FailureAction,
    pub on_handler_fault: FailureAction,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            on_malformed: FailureAction::Discard,
            on_handler_fault: FailureAction::Requeue,
        }
    }
}

/// Tuning knobs that do not affect the connection identity.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Number of unacknowledged messages allowed per consumer (0 means unlimited)
    pub prefetch_count: u16,

    /// Whether publishes wait for broker confirms
    pub confirm_mode: bool,

    pub connect_timeout: Duration,

    pub publish_strategy: PublishStrategy,

    pub ack_policy: AckPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            prefetch_count: default_prefetch_count(),
            confirm_mode: true,
            connect_timeout: Duration::from_secs(default_connect_timeout_seconds()),
            publish_strategy: PublishStrategy::default(),
            ack_policy: AckPolicy::default(),
        }
    }
}

pub(crate) fn default_prefetch_count() -> u16 {
    10
}

pub(crate) fn default_connect_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub params: ConnectionParams,
    pub options: ClientOptions,
}

impl Config {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            options: ClientOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }
}
