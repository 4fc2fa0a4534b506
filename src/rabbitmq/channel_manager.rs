use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionSupervisor;
use super::errors::Result;
use super::transport::{BrokerChannel, BrokerConnection, ConnectionEvent};

const EVENT_BUFFER: usize = 32;

/// Channel-level settings applied when the shared channel is opened.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Number of unacknowledged messages allowed (0 means unlimited)
    pub prefetch_count: u16,

    /// Whether to use publisher confirms
    pub confirm_mode: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 10,
            confirm_mode: true,
        }
    }
}

#[derive(Default)]
struct SharedState {
    // Bumped for every new connection so late events from an old one are ignored.
    generation: u64,
    connection: Option<Arc<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

/// Owns the one connection and the one channel shared by every publish and
/// consume call in the process.
///
/// Creation happens under a single async lock, so concurrent first callers
/// share one connection instead of racing to open several.
pub struct ChannelManager {
    supervisor: ConnectionSupervisor,
    config: ChannelConfig,
    state: Arc<Mutex<SharedState>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ChannelManager {
    pub fn new(supervisor: ConnectionSupervisor, config: ChannelConfig) -> Self {
        debug!(
            prefetch = %config.prefetch_count,
            confirm = %config.confirm_mode,
            "Creating channel manager"
        );

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            supervisor,
            config,
            state: Arc::new(Mutex::new(SharedState::default())),
            events,
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Events of the shared connection, across reconnections.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Returns the shared channel, opening the connection and channel if needed.
    pub async fn ensure_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        info!("Creating channel...");
        let mut state = self.state.lock().await;

        let connection_alive = state
            .connection
            .as_ref()
            .map_or(false, |conn| conn.is_connected());

        if connection_alive {
            if let Some(channel) = state.channel.as_ref().filter(|ch| ch.is_open()) {
                warn!("Channel already exists...");
                return Ok(channel.clone());
            }
        } else if state.connection.take().is_some() {
            debug!("Discarding closed connection");
        }
        state.channel = None;

        let result = self.open_channel(&mut state).await;
        if let Err(e) = &result {
            error!("Failed to create AMQP channel: {}", e);
        }
        result
    }

    async fn open_channel(&self, state: &mut SharedState) -> Result<Arc<dyn BrokerChannel>> {
        let connection = match state.connection.clone() {
            Some(connection) => connection,
            None => {
                let connection = self.supervisor.connect().await?;
                state.generation += 1;
                self.watch(connection.events(), state.generation);
                state.connection = Some(connection.clone());
                connection
            }
        };

        let channel = connection.create_channel().await?;
        if let Err(e) = self.configure(channel.as_ref()).await {
            let _ = channel.close().await;
            return Err(e);
        }

        state.channel = Some(channel.clone());
        info!("Channel created successfully");
        Ok(channel)
    }

    async fn configure(&self, channel: &dyn BrokerChannel) -> Result<()> {
        if self.config.prefetch_count > 0 {
            debug!("Setting channel QoS to {}", self.config.prefetch_count);
            channel.set_prefetch(self.config.prefetch_count).await?;
        }
        if self.config.confirm_mode {
            debug!("Enabling confirm mode on shared channel");
            channel.enable_confirms().await?;
        }
        Ok(())
    }

    /// Forwards events of one connection and forgets it once it closes.
    fn watch(&self, mut events: broadcast::Receiver<ConnectionEvent>, generation: u64) {
        let state = Arc::clone(&self.state);
        let forward = self.events.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let closed = event == ConnectionEvent::Closed;
                        let _ = forward.send(event);
                        if closed {
                            let mut state = state.lock().await;
                            if state.generation == generation {
                                state.channel = None;
                                state.connection = None;
                                warn!("Shared connection closed, cached channel discarded");
                            }
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Closes the shared channel, then its connection.
    pub async fn shutdown(&self) -> Result<()> {
        let (channel, connection) = {
            let mut state = self.state.lock().await;
            (state.channel.take(), state.connection.take())
        };

        if let Some(channel) = channel {
            info!("Closing channel...");
            if let Err(e) = channel.close().await {
                warn!("Failed to close channel: {}", e);
            }
        }
        if let Some(connection) = connection {
            info!("Closing connection...");
            connection.close().await?;
        }
        Ok(())
    }

    /// Check if the shared channel is in a healthy state
    pub async fn is_healthy(&self) -> bool {
        let state = self.state.lock().await;
        state.channel.as_ref().map_or(false, |ch| ch.is_open())
            && state.connection.as_ref().map_or(false, |conn| conn.is_connected())
    }
}
