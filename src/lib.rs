//! Publish/subscribe client for a RabbitMQ broker.
//!
//! One TLS connection and one channel per process carry every publish and
//! subscription. Publishers send an [`Envelope`] to a durable direct exchange;
//! consumers bind a queue named after their identity and acknowledge each
//! delivery after their handler returns.

pub mod client;
pub mod config;
pub mod env;
pub mod logging;
pub mod message;
pub mod rabbitmq;

pub use client::RabbitClient;
pub use config::{AckPolicy, ClientOptions, Config, ConnectionParams, FailureAction, PublishStrategy};
pub use message::Envelope;
pub use rabbitmq::{MessageHandler, RabbitMQError, Result, Subscription};
