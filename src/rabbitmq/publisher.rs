use std::sync::Arc;

use tracing::{error, info, warn};

use super::channel_manager::ChannelManager;
use super::errors::{Result, PUBLISH_ERROR};
use super::topology::declare_exchange;
use super::transport::{BrokerChannel, BrokerConnection};
use crate::config::PublishStrategy;
use crate::message::Envelope;

/// Publishes envelopes to a direct exchange.
pub struct Publisher {
    channels: Arc<ChannelManager>,
    strategy: PublishStrategy,
}

impl Publisher {
    pub fn new(channels: Arc<ChannelManager>, strategy: PublishStrategy) -> Self {
        Self { channels, strategy }
    }

    pub fn strategy(&self) -> PublishStrategy {
        self.strategy
    }

    /// Publishes `envelope` to `exchange` under `routing_key`.
    ///
    /// `Ok(false)` is the broker's flow-control signal (or a negative confirm);
    /// it is logged but is not an error. Every failure is logged once here and
    /// returned so the caller can decide whether it matters. With the dedicated
    /// strategy, the channel and connection opened for this call are closed
    /// before returning on every path.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) -> Result<bool> {
        let result = match self.strategy {
            PublishStrategy::Dedicated => {
                self.publish_dedicated(exchange, routing_key, envelope, consumer_identity)
                    .await
            }
            PublishStrategy::Shared => {
                self.publish_shared(exchange, routing_key, envelope, consumer_identity)
                    .await
            }
        };

        match &result {
            Ok(true) => info!(
                "Data published successfully to {} via exchange {} with routingKey: {}.",
                consumer_identity, exchange, routing_key
            ),
            Ok(false) => error!(
                "Data failed to be published to {} via exchange {} with routingKey: {}.",
                consumer_identity, exchange, routing_key
            ),
            Err(e) => error!("{}: {}", PUBLISH_ERROR, e),
        }
        result
    }

    /// Fire-and-forget variant: failures are logged by [`Publisher::publish`]
    /// and dropped.
    pub async fn send_message(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) {
        let _ = self
            .publish(exchange, routing_key, envelope, consumer_identity)
            .await;
    }

    async fn publish_dedicated(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) -> Result<bool> {
        let connection = self.channels.supervisor().connect().await?;

        info!("Opening channel...");
        let outcome = match connection.create_channel().await {
            Ok(channel) => {
                let outcome = self
                    .publish_on(
                        channel.as_ref(),
                        exchange,
                        routing_key,
                        envelope,
                        consumer_identity,
                        self.channels.config().confirm_mode,
                    )
                    .await;

                info!("Closing channel...");
                if let Err(e) = channel.close().await {
                    warn!("Failed to close channel: {}", e);
                }
                outcome
            }
            Err(e) => Err(e),
        };

        close_connection(connection.as_ref()).await;
        outcome
    }

    async fn publish_shared(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) -> Result<bool> {
        let channel = self.channels.ensure_channel().await?;
        // Confirm mode on the shared channel is set up by the channel manager.
        self.publish_on(
            channel.as_ref(),
            exchange,
            routing_key,
            envelope,
            consumer_identity,
            false,
        )
        .await
    }

    async fn publish_on(
        &self,
        channel: &dyn BrokerChannel,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
        enable_confirms: bool,
    ) -> Result<bool> {
        if enable_confirms {
            channel.enable_confirms().await?;
        }
        declare_exchange(channel, exchange).await?;

        info!(
            "Publishing data to {} via exchange {} with routingKey: {}...",
            consumer_identity, exchange, routing_key
        );
        let payload = envelope.to_bytes()?;
        channel.publish(exchange, routing_key, payload).await
    }
}

async fn close_connection(connection: &dyn BrokerConnection) {
    info!("Closing connection...");
    if let Err(e) = connection.close().await {
        warn!("Failed to close connection: {}", e);
    }
}
