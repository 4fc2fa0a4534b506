use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::channel_manager::ChannelManager;
use super::errors::{RabbitMQError, Result, CONSUME_ERROR};
use super::topology::bind_topology;
use super::transport::{BrokerChannel, Delivery, DeliveryStream};
use crate::config::{AckPolicy, FailureAction};
use crate::message::Envelope;

/// Receives the `data` field of each envelope and the routing key it arrived under.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, data: Option<Value>, routing_key: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(Option<Value>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, data: Option<Value>, routing_key: &str) -> anyhow::Result<()> {
        self(data, routing_key)
    }
}

/// Subscribes handlers to queues over the shared channel.
pub struct Consumer {
    channels: Arc<ChannelManager>,
    policy: AckPolicy,
}

impl Consumer {
    pub fn new(channels: Arc<ChannelManager>, policy: AckPolicy) -> Self {
        Self { channels, policy }
    }

    /// Binds a queue named `consumer_identity` to `exchange`/`routing_key` and
    /// starts delivering to `handler`.
    ///
    /// Deliveries are handled one at a time, in broker order, on a task of
    /// their own. Each one is acknowledged only after the handler returns.
    /// The subscription runs until cancelled or until the connection is lost;
    /// it is not re-established automatically.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        exchange: &str,
        routing_key: &str,
        consumer_identity: &str,
        handler: H,
    ) -> Result<Subscription> {
        let consumer_tag = format!("{}-{}", consumer_identity, Uuid::new_v4());

        let (channel, queue, deliveries) = self
            .start(exchange, routing_key, consumer_identity, &consumer_tag)
            .await
            .map_err(|e| {
                error!("{}: {}", CONSUME_ERROR, e);
                e
            })?;

        let worker = DeliveryLoop {
            exchange: exchange.to_string(),
            queue: queue.clone(),
            consumer_identity: consumer_identity.to_string(),
            policy: self.policy,
            handler: Arc::new(handler),
        };

        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(worker.run(deliveries, cancelled));

        Ok(Subscription {
            queue,
            consumer_tag,
            channel,
            cancel: Some(cancel),
            task,
        })
    }

    async fn start(
        &self,
        exchange: &str,
        routing_key: &str,
        consumer_identity: &str,
        consumer_tag: &str,
    ) -> Result<(Arc<dyn BrokerChannel>, String, DeliveryStream)> {
        let channel = self.channels.ensure_channel().await?;
        let queue = bind_topology(channel.as_ref(), exchange, consumer_identity, routing_key).await?;
        info!("Subscribed to {}/{} via queue {}.", exchange, routing_key, queue);

        let deliveries = channel.consume(&queue, consumer_tag).await?;
        Ok((channel, queue, deliveries))
    }
}

/// Handle to a running subscription. Dropping it leaves the subscription running.
pub struct Subscription {
    queue: String,
    consumer_tag: String,
    channel: Arc<dyn BrokerChannel>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the broker consumer, then stops handler invocations.
    ///
    /// A delivery already being handled is settled normally. Deliveries the
    /// broker pushed before the cancel took effect are requeued.
    pub async fn cancel(mut self) -> Result<()> {
        let cancelled = if self.channel.is_open() {
            self.channel.cancel(&self.consumer_tag).await
        } else {
            Ok(())
        };

        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = (&mut self.task).await;

        cancelled?;
        info!("Subscription {} on queue {} cancelled", self.consumer_tag, self.queue);
        Ok(())
    }

    /// Waits until the delivery stream ends.
    pub async fn join(self) {
        // Keep the cancel sender alive so waiting does not stop the loop.
        let _cancel = self.cancel;
        let _ = self.task.await;
    }
}

struct DeliveryLoop<H> {
    exchange: String,
    queue: String,
    consumer_identity: String,
    policy: AckPolicy,
    handler: Arc<H>,
}

impl<H: MessageHandler> DeliveryLoop<H> {
    async fn run(self, mut deliveries: DeliveryStream, cancel: oneshot::Receiver<()>) {
        // A dropped handle must not stop the loop, only an explicit cancel.
        let cancelled = async move {
            if cancel.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(cancelled);

        info!("Waiting for publishers requests...");
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancelled => {
                    self.requeue_buffered(&mut deliveries).await;
                    break;
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery).await,
                Some(Err(e)) => error!("Error receiving message on queue {}: {}", self.queue, e),
                None => {
                    warn!("Delivery stream for queue {} ended", self.queue);
                    break;
                }
            }
        }
    }

    async fn requeue_buffered(&self, deliveries: &mut DeliveryStream) {
        let mut requeued = 0;
        while let Some(Some(next)) = deliveries.next().now_or_never() {
            if let Ok(delivery) = next {
                settle(delivery, FailureAction::Requeue).await;
                requeued += 1;
            }
        }
        if requeued > 0 {
            info!("Requeued {} undelivered messages from queue {}", requeued, self.queue);
        }
    }

    async fn process(&self, delivery: Delivery) {
        let envelope = match Envelope::from_slice(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    "Malformed message in queue {} via exchange {}: {}",
                    self.queue, self.exchange, e
                );
                settle(delivery, self.policy.on_malformed).await;
                return;
            }
        };

        info!(
            "Data arrived from apiKey: {} in queue {} via exchange {}.",
            envelope.apikey, self.queue, self.exchange
        );

        let outcome = self.invoke(envelope.data, &delivery.routing_key).await;
        match outcome {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    error!("Failed to acknowledge message: {}", e);
                    return;
                }
                info!(
                    "The data arriving from {} has been consumed successfully from queue {} via exchange {}.",
                    self.consumer_identity, self.queue, self.exchange
                );
            }
            Err(e) => {
                error!("Error processing message from queue {}: {}", self.queue, e);
                settle(delivery, self.policy.on_handler_fault).await;
            }
        }
    }

    /// Runs the handler, turning both returned errors and panics into `HandlerFault`.
    async fn invoke(&self, data: Option<Value>, routing_key: &str) -> Result<()> {
        match AssertUnwindSafe(self.handler.handle(data, routing_key))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RabbitMQError::HandlerFault(format!("{:#}", e))),
            Err(panic) => Err(RabbitMQError::HandlerFault(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

async fn settle(delivery: Delivery, action: FailureAction) {
    let result = match action {
        FailureAction::Ack => delivery.ack().await,
        FailureAction::Requeue => delivery.nack(true).await,
        FailureAction::Discard => delivery.nack(false).await,
    };

    if let Err(e) = result {
        error!("Failed to settle message ({:?}): {}", action, e);
    }
}
