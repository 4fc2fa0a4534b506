// src/rabbitmq/transport.rs
// The narrow surface of the broker-protocol library this crate relies on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use super::errors::Result;
use super::topology::{ExchangeSpec, QueueSpec};
use crate::config::ConnectionParams;

/// Terminal events reported by a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection reported an error. Does not imply the connection is gone.
    Error(String),
    /// The connection is gone; any cached handle derived from it is invalid.
    Closed,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Subscribe to terminal events of this connection.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

/// A multiplexed session on a connection. Implementations must be safe to
/// use from several tasks at once.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn set_prefetch(&self, count: u16) -> Result<()>;

    async fn enable_confirms(&self) -> Result<()>;

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()>;

    /// Returns the name the broker assigned to the queue.
    async fn declare_queue(&self, queue: &QueueSpec) -> Result<String>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Returns the broker's flow-control/confirm signal: `false` means the
    /// message was not accepted, which callers treat as best-effort.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<bool>;

    /// Starts a manual-acknowledgment consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message handed out by the broker. Must be settled exactly once.
pub struct Delivery {
    pub data: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        data: Vec<u8>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            data,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("len", &self.data.len())
            .finish()
    }
}
