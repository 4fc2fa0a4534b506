// src/rabbitmq/topology.rs

use tracing::debug;

use super::errors::Result;
use super::transport::BrokerChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable direct exchange.
    pub fn direct(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ExchangeKind::Direct,
            durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Shareable across connections, removed once the last consumer detaches.
    pub fn shared(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exclusive: false,
            auto_delete: true,
        }
    }
}

pub async fn declare_exchange(channel: &dyn BrokerChannel, exchange: &str) -> Result<()> {
    channel.declare_exchange(&ExchangeSpec::direct(exchange)).await
}

/// Declares the exchange and queue and binds them under `routing_key`.
///
/// Every step is idempotent on the broker side, so this runs unconditionally
/// before each publish/consume instead of caching what was already declared.
/// Returns the queue name reported by the broker.
pub async fn bind_topology(
    channel: &dyn BrokerChannel,
    exchange: &str,
    queue: &str,
    routing_key: &str,
) -> Result<String> {
    declare_exchange(channel, exchange).await?;
    let queue = channel.declare_queue(&QueueSpec::shared(queue)).await?;
    channel.bind_queue(&queue, exchange, routing_key).await?;

    debug!(
        exchange = %exchange,
        queue = %queue,
        routing_key = %routing_key,
        "Topology bound"
    );
    Ok(queue)
}
