use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use rabbitmq_pubsub::{logging, Envelope, RabbitClient};

#[derive(Parser)]
#[command(name = "rabbitmq-pubsub", about = "Publish to or subscribe on a RabbitMQ direct exchange")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one envelope and exit
    Publish {
        exchange: String,
        routing_key: String,
        /// Identity placed in the envelope's `apikey`
        apikey: String,
        /// JSON payload; plain text is sent as a JSON string
        data: Option<String>,
        /// Identity of the receiving consumer, for logging
        #[arg(long)]
        consumer: Option<String>,
    },
    /// Print every payload delivered to the queue named after `apikey`
    Subscribe {
        exchange: String,
        routing_key: String,
        apikey: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let client = RabbitClient::from_env().context("Failed to load RabbitMQ configuration")?;

    match cli.command {
        Command::Publish {
            exchange,
            routing_key,
            apikey,
            data,
            consumer,
        } => {
            let envelope = match data {
                Some(raw) => Envelope::new(
                    apikey.as_str(),
                    serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)),
                ),
                None => Envelope::empty(apikey.as_str()),
            };
            let consumer = consumer.unwrap_or_else(|| apikey.clone());

            let accepted = client
                .publish(&exchange, &routing_key, &envelope, &consumer)
                .await?;
            if !accepted {
                anyhow::bail!("broker did not accept the message");
            }
        }
        Command::Subscribe {
            exchange,
            routing_key,
            apikey,
        } => {
            let subscription = client
                .subscribe(&exchange, &routing_key, &apikey, |data: Option<Value>, key: &str| -> anyhow::Result<()> {
                    match data {
                        Some(data) => println!("[{}] {}", key, data),
                        None => println!("[{}] <no data>", key),
                    }
                    Ok(())
                })
                .await?;

            info!("Service running. Press Ctrl+C to exit.");
            tokio::signal::ctrl_c().await?;

            subscription.cancel().await?;
            client.shutdown().await?;
        }
    }

    Ok(())
}
