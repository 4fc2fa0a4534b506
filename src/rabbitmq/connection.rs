// src/rabbitmq/connection.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::errors::Result;
use super::transport::{BrokerConnection, ConnectionEvent, Transport};
use crate::config::ConnectionParams;

/// Opens broker connections and watches them for terminal events.
///
/// The supervisor never reconnects on its own: a lost connection is reported
/// through [`ConnectionEvent::Closed`] and must be rebuilt by whoever retries
/// the failed operation.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    params: ConnectionParams,
    connect_timeout: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        params: ConnectionParams,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            params,
            connect_timeout,
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Validates the parameters, then opens one connection.
    ///
    /// Configuration problems are reported before any network I/O. Failures
    /// are returned, not logged; the caller decides how to report them.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerConnection>> {
        self.params.validate()?;

        info!("Connecting to RabbitMQ at {}", self.params.redacted_url());
        let connection = timeout(self.connect_timeout, self.transport.connect(&self.params)).await??;

        observe(connection.events());
        info!("Successfully connected to RabbitMQ");
        Ok(connection)
    }
}

fn observe(mut events: broadcast::Receiver<ConnectionEvent>) {
    info!("Setting up connection listeners");
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Error(message)) => {
                    error!("AMQP connection error: {}", message);
                }
                Ok(ConnectionEvent::Closed) => {
                    info!("AMQP connection closed");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} connection events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
