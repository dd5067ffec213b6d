//! Publish command.

use anyhow::Context as _;
use bytes::Bytes;
use clap::Args;
use mqttpad_session::{QoS, Session};
use serde::Serialize;

use super::{BrokerArgs, connection_params, parse_qos};
use crate::Cli;

/// Connect, publish one message, and disconnect.
#[derive(Args)]
pub struct PubCommand {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Topic to publish to
    #[arg(short = 't', long)]
    topic: String,

    /// Message payload
    #[arg(short = 'm', long, conflicts_with = "file", required_unless_present = "file")]
    message: Option<String>,

    /// Read the payload from a file
    #[arg(long)]
    file: Option<String>,

    /// QoS level (0, 1 or 2)
    #[arg(short = 'q', long, default_value = "0", value_parser = parse_qos)]
    qos: QoS,

    /// Ask the broker to retain the message
    #[arg(short = 'r', long)]
    retain: bool,
}

#[derive(Serialize)]
struct PublishResult<'a> {
    topic: &'a str,
    bytes: usize,
    qos: u8,
    retain: bool,
}

impl PubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let payload = self.payload()?;
        let params = connection_params(cli, &self.broker)?;

        let session = Session::new(params)?;
        session.connect().await?;

        let size = payload.len();
        let result = session
            .publish(&self.topic, payload, self.qos, self.retain)
            .await;
        session.disconnect().await;
        result?;

        if cli.json {
            let out = PublishResult {
                topic: &self.topic,
                bytes: size,
                qos: self.qos.into(),
                retain: self.retain,
            };
            println!("{}", serde_json::to_string(&out)?);
        } else {
            println!("Message published successfully on topic '{}'", self.topic);
        }
        Ok(())
    }

    fn payload(&self) -> anyhow::Result<Bytes> {
        match (&self.message, &self.file) {
            (Some(message), _) => Ok(Bytes::from(message.clone())),
            (None, Some(path)) => {
                let data = std::fs::read(path).with_context(|| format!("read {}", path))?;
                Ok(Bytes::from(data))
            }
            (None, None) => anyhow::bail!("either --message or --file is required"),
        }
    }
}
