use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rabbitmq::errors::{RabbitMQError, Result};

/// The request envelope exchanged between publishers and consumers.
///
/// `apikey` names the logical consumer identity; `data` is opaque to this crate.
/// Incoming bodies without an `apikey` are still accepted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub apikey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(apikey: impl Into<String>, data: impl Into<Value>) -> Self {
        Envelope {
            apikey: apikey.into(),
            data: Some(data.into()),
        }
    }

    /// An envelope that carries no payload.
    pub fn empty(apikey: impl Into<String>) -> Self {
        Envelope {
            apikey: apikey.into(),
            data: None,
        }
    }

    /// UTF-8 JSON bytes as published on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| RabbitMQError::Deserialization(e.to_string()))
    }
}
