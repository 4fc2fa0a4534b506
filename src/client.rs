use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;

use crate::config::Config;
use crate::message::Envelope;
use crate::rabbitmq::amqp_client::LapinTransport;
use crate::rabbitmq::channel_manager::{ChannelConfig, ChannelManager};
use crate::rabbitmq::connection::ConnectionSupervisor;
use crate::rabbitmq::consumer::{Consumer, MessageHandler, Subscription};
use crate::rabbitmq::errors::Result;
use crate::rabbitmq::publisher::Publisher;
use crate::rabbitmq::transport::{BrokerChannel, ConnectionEvent, Transport};

static GLOBAL: OnceLock<RabbitClient> = OnceLock::new();

/// Entry point bundling the shared channel, a publisher and a consumer.
pub struct RabbitClient {
    channels: Arc<ChannelManager>,
    publisher: Publisher,
    consumer: Consumer,
}

impl RabbitClient {
    /// Client backed by lapin.
    pub fn new(config: Config) -> Self {
        Self::with_transport(config, Arc::new(LapinTransport::default()))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let Config { params, options } = config;

        let supervisor = ConnectionSupervisor::new(transport, params, options.connect_timeout);
        let channels = Arc::new(ChannelManager::new(
            supervisor,
            ChannelConfig {
                prefetch_count: options.prefetch_count,
                confirm_mode: options.confirm_mode,
            },
        ));

        Self {
            publisher: Publisher::new(Arc::clone(&channels), options.publish_strategy),
            consumer: Consumer::new(Arc::clone(&channels), options.ack_policy),
            channels,
        }
    }

    /// Builds a client from `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::load()?))
    }

    /// Process-wide client, created from the environment on first use.
    pub fn global() -> Result<&'static RabbitClient> {
        if let Some(client) = GLOBAL.get() {
            return Ok(client);
        }
        let client = Self::from_env()?;
        Ok(GLOBAL.get_or_init(|| client))
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub async fn ensure_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.channels.ensure_channel().await
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.channels.connection_events()
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) -> Result<bool> {
        self.publisher
            .publish(exchange, routing_key, envelope, consumer_identity)
            .await
    }

    pub async fn send_message(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
        consumer_identity: &str,
    ) {
        self.publisher
            .send_message(exchange, routing_key, envelope, consumer_identity)
            .await
    }

    pub async fn subscribe<H: MessageHandler>(
        &self,
        exchange: &str,
        routing_key: &str,
        consumer_identity: &str,
        handler: H,
    ) -> Result<Subscription> {
        self.consumer
            .subscribe(exchange, routing_key, consumer_identity, handler)
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.channels.shutdown().await
    }
}
