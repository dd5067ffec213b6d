//! Subscribe command.

use clap::Args;
use mqttpad_cli::{OutputFormat, format_message};
use mqttpad_session::{QoS, Session, SessionEvent, SessionState};
use tracing::{info, warn};

use super::{BrokerArgs, connection_params, parse_qos, print_success};
use crate::Cli;

/// Subscribe to a topic filter and print every message.
///
/// Runs until Ctrl-C, until `--count` messages have arrived, or until the
/// broker closes the connection.
#[derive(Args)]
pub struct SubCommand {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Topic filter (wildcards `+` and `#` allowed)
    #[arg(short = 't', long)]
    topic: String,

    /// Exit after this many messages
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// QoS level (0, 1 or 2)
    #[arg(short = 'q', long, default_value = "0", value_parser = parse_qos)]
    qos: QoS,
}

impl SubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let params = connection_params(cli, &self.broker)?;
        let format = OutputFormat::from_json_flag(cli.json);

        let session = Session::new(params)?;
        session.on_event(|event| match event {
            SessionEvent::SubscriptionRejected { filter } => {
                warn!("Broker rejected subscription to {}", filter)
            }
            SessionEvent::HandlerFailed { topic, error } => {
                warn!("Delivery on {} failed: {}", topic, error)
            }
            _ => {}
        });
        session.connect().await?;

        let (_sub, mut rx) = session.subscribe_channel(&self.topic, self.qos).await?;
        if !cli.json {
            print_success(&format!("Subscribed to '{}'", self.topic));
        }

        let mut states = session.watch_state();
        let mut received = 0usize;
        let result = loop {
            if self.count.is_some_and(|n| received >= n) {
                break Ok(());
            }
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break Ok(()) };
                    match format_message(&msg, format) {
                        Ok(line) => println!("{}", line),
                        Err(e) => break Err(e),
                    }
                    received += 1;
                }
                changed = states.wait_for(|s| *s != SessionState::Connected) => {
                    break match changed {
                        Ok(state) => Err(anyhow::anyhow!("connection closed ({})", *state)),
                        Err(e) => Err(e.into()),
                    };
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break Ok(());
                }
            }
        };

        session.disconnect().await;
        result
    }
}
