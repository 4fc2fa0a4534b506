// src/rabbitmq/amqp_client.rs
// lapin-backed implementation of the transport traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::*,
    publisher_confirm::Confirmation,
    tcp::AMQPUriTcpExt,
    types::FieldTable,
    uri::{AMQPScheme, AMQPUri},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::errors::{RabbitMQError, Result};
use super::tls::tls_connector;
use super::topology::{ExchangeKind, ExchangeSpec, QueueSpec};
use super::transport::{
    Acknowledger, BrokerChannel, BrokerConnection, ConnectionEvent, Delivery, DeliveryStream,
    Transport,
};
use crate::config::ConnectionParams;

const REPLY_SUCCESS: u16 = 200;
const EVENT_BUFFER: usize = 16;

/// Opens TLS connections with client-certificate authentication.
pub struct LapinTransport {
    connection_name: String,
}

impl LapinTransport {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
        }
    }
}

impl Default for LapinTransport {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn BrokerConnection>> {
        let connector = tls_connector(params)?;
        let uri = params
            .url
            .parse::<AMQPUri>()
            .map_err(|e| RabbitMQError::Configuration(format!("invalid broker URL: {}", e)))?;
        let properties = ConnectionProperties::default()
            .with_connection_name(self.connection_name.clone().into());

        // TLS is always applied here with our own connector, whatever the URL scheme.
        let handshake = move |uri: &AMQPUri| {
            let mut plain = uri.clone();
            plain.scheme = AMQPScheme::AMQP;
            plain
                .connect()
                .and_then(|stream| stream.into_rustls(&connector, &uri.authority.host))
        };

        let connection = Connection::connector(uri, Box::new(handshake), properties)
            .await
            .map_err(|e| RabbitMQError::Transport(format!("Failed to connect: {}", e)))?;

        Ok(Arc::new(AmqpConnection::new(connection)))
    }
}

pub struct AmqpConnection {
    inner: Connection,
    events: broadcast::Sender<ConnectionEvent>,
}

impl AmqpConnection {
    fn new(inner: Connection) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let sender = events.clone();
        let status = inner.status().clone();
        inner.on_error(move |err| {
            let _ = sender.send(ConnectionEvent::Error(err.to_string()));
            if !status.connected() {
                let _ = sender.send(ConnectionEvent::Closed);
            }
        });

        Self { inner, events }
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_connected(&self) -> bool {
        self.inner.status().connected()
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| RabbitMQError::Transport(format!("Failed to create channel: {}", e)))?;

        debug!(channel_id = channel.id(), "Channel opened");
        Ok(Arc::new(AmqpChannel {
            inner: channel,
            confirms: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .inner
            .close(REPLY_SUCCESS, "Closing connection")
            .await
            .map_err(|e| RabbitMQError::Transport(e.to_string()));
        let _ = self.events.send(ConnectionEvent::Closed);
        result
    }
}

pub struct AmqpChannel {
    inner: Channel,
    confirms: AtomicBool,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.inner
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| RabbitMQError::Transport(format!("Failed to set QoS: {}", e)))
    }

    async fn enable_confirms(&self) -> Result<()> {
        self.inner
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                RabbitMQError::Transport(format!("Failed to enable confirm mode: {}", e))
            })?;
        self.confirms.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()> {
        let kind = match exchange.kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        };

        self.inner
            .exchange_declare(
                &exchange.name,
                kind,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RabbitMQError::Topology(format!(
                    "Failed to declare exchange '{}': {}",
                    exchange.name, e
                ))
            })
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<String> {
        let declared = self
            .inner
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RabbitMQError::Topology(format!("Failed to declare queue '{}': {}", queue.name, e))
            })?;

        Ok(declared.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::Topology(format!("Failed to bind queue: {}", e)))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<bool> {
        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type("application/json".into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| RabbitMQError::Publish(e.to_string()))?;

        if !self.confirms.load(Ordering::SeqCst) {
            return Ok(true);
        }

        let confirmation = confirm
            .await
            .map_err(|e| RabbitMQError::Publish(e.to_string()))?;
        Ok(!matches!(confirmation, Confirmation::Nack(_)))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::Subscribe(e.to_string()))?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(into_delivery)
                    .map_err(|e| RabbitMQError::Subscribe(e.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| RabbitMQError::Subscribe(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(REPLY_SUCCESS, "Closing channel")
            .await
            .map_err(|e| RabbitMQError::Transport(e.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    Delivery::new(
        delivery.data,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.redelivered,
        Box::new(AmqpAcker(delivery.acker)),
    )
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| RabbitMQError::Ack(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| RabbitMQError::Ack(e.to_string()))
    }
}
