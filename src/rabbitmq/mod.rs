// src/rabbitmq/mod.rs
// RabbitMQ implementation of the publish/subscribe core

pub mod errors;
pub mod transport;
pub mod topology;
pub mod connection;
pub mod channel_manager;
pub mod publisher;
pub mod consumer;
pub mod amqp_client;
mod tls;

// Re-export specific items to simplify imports elsewhere
pub use channel_manager::{ChannelConfig, ChannelManager};
pub use connection::ConnectionSupervisor;
pub use consumer::{Consumer, MessageHandler, Subscription};
pub use errors::{RabbitMQError, Result};
pub use publisher::Publisher;
pub use topology::{bind_topology, declare_exchange, ExchangeKind, ExchangeSpec, QueueSpec};
pub use transport::{
    Acknowledger, BrokerChannel, BrokerConnection, ConnectionEvent, Delivery, DeliveryStream,
    Transport,
};
