// src/env.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::config::{
    default_connect_timeout_seconds, default_prefetch_count, AckPolicy, ClientOptions, Config,
    ConnectionParams, DEFAULT_URL,
};
use crate::rabbitmq::errors::{RabbitMQError, Result};

pub const RABBITMQ_URL: &str = "RABBITMQ_URL";
pub const RABBITMQ_CLIENT_CERTIFICATE: &str = "RABBITMQ_CLIENT_CERTIFICATE";
pub const RABBITMQ_CLIENT_PRIVATE_KEY: &str = "RABBITMQ_CLIENT_PRIVATE_KEY";
pub const RABBITMQ_CA_CERTIFICATE: &str = "RABBITMQ_CA_CERTIFICATE";
pub const RABBITMQ_CERT_PASSWORD: &str = "RABBITMQ_CERT_PASSWORD";
pub const RABBITMQ_PREFETCH_COUNT: &str = "RABBITMQ_PREFETCH_COUNT";
pub const RABBITMQ_CONFIRM_MODE: &str = "RABBITMQ_CONFIRM_MODE";
pub const RABBITMQ_CONNECT_TIMEOUT_SECONDS: &str = "RABBITMQ_CONNECT_TIMEOUT_SECONDS";
pub const RABBITMQ_PUBLISH_STRATEGY: &str = "RABBITMQ_PUBLISH_STRATEGY";
pub const RABBITMQ_ON_MALFORMED: &str = "RABBITMQ_ON_MALFORMED";
pub const RABBITMQ_ON_HANDLER_FAULT: &str = "RABBITMQ_ON_HANDLER_FAULT";

const ENV_FILE: &str = ".env";

impl Config {
    /// Loads the nearest `.env` file (if any) and then reads the environment.
    pub fn load() -> Result<Self> {
        if let Some(path) = find_env_file() {
            debug!("Loading environment from {}", path.display());
            dotenv::from_path(&path).ok();
        }
        Self::from_env()
    }

    /// Reads the process environment only.
    ///
    /// Missing certificates are not an error here; they are reported by
    /// [`ConnectionParams::validate`] when a connection is attempted.
    pub fn from_env() -> Result<Self> {
        let params = ConnectionParams {
            url: env::var(RABBITMQ_URL).unwrap_or_else(|_| DEFAULT_URL.to_string()),
            client_cert: secret_var(RABBITMQ_CLIENT_CERTIFICATE)?,
            client_key: secret_var(RABBITMQ_CLIENT_PRIVATE_KEY)?,
            ca_cert: secret_var(RABBITMQ_CA_CERTIFICATE)?,
            passphrase: env::var(RABBITMQ_CERT_PASSWORD).unwrap_or_default(),
        };

        let defaults = AckPolicy::default();
        let options = ClientOptions {
            prefetch_count: parsed_var(RABBITMQ_PREFETCH_COUNT, default_prefetch_count())?,
            confirm_mode: parsed_var(RABBITMQ_CONFIRM_MODE, true)?,
            connect_timeout: Duration::from_secs(parsed_var(
                RABBITMQ_CONNECT_TIMEOUT_SECONDS,
                default_connect_timeout_seconds(),
            )?),
            publish_strategy: parsed_var(RABBITMQ_PUBLISH_STRATEGY, Default::default())?,
            ack_policy: AckPolicy {
                on_malformed: parsed_var(RABBITMQ_ON_MALFORMED, defaults.on_malformed)?,
                on_handler_fault: parsed_var(
                    RABBITMQ_ON_HANDLER_FAULT,
                    defaults.on_handler_fault,
                )?,
            },
        };

        Ok(Config { params, options })
    }
}

/// Walks up from the working directory looking for `.env`, then tries the
/// home directory.
pub fn find_env_file() -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    find_env_file_from(&cwd).or_else(|| {
        home::home_dir()
            .map(|home| home.join(ENV_FILE))
            .filter(|path| path.is_file())
    })
}

pub fn find_env_file_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(ENV_FILE))
        .find(|path| path.is_file())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) if !val.trim().is_empty() => val.trim().parse().map_err(|e| {
            RabbitMQError::Configuration(format!("invalid value for {}: {}", name, e))
        }),
        _ => Ok(default),
    }
}

/// Certificate material is either inline PEM or a path to a PEM file.
fn secret_var(name: &str) -> Result<String> {
    let value = env::var(name).unwrap_or_default();
    resolve_pem(&value).map_err(|e| {
        RabbitMQError::Configuration(format!("cannot read {}: {}", name, e))
    })
}

pub fn resolve_pem(value: &str) -> std::io::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.replace("\\n", "\n"));
    }

    let path = Path::new(trimmed);
    if path.is_file() {
        fs::read_to_string(path)
    } else {
        Ok(trimmed.replace("\\n", "\n"))
    }
}
