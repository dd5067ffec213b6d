//! mqttpad - publish and subscribe to MQTT topics from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ConfigCommand, PubCommand, SubCommand};

/// mqttpad - a small MQTT publisher and subscriber.
///
/// Broker profiles are stored in ~/.mqttpad/mqttpad/ and selected with
/// `-c <context>`, similar to kubectl's context management. Broker flags
/// on `pub` and `sub` override the selected profile.
#[derive(Parser)]
#[command(name = "mqttpad")]
#[command(about = "MQTT publish/subscribe CLI tool")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.mqttpad/mqttpad/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Context name to use
    #[arg(short = 'c', long, global = true)]
    pub context: Option<String>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage broker contexts
    Config(ConfigCommand),
    /// Publish one message
    Pub(PubCommand),
    /// Subscribe and print messages
    Sub(SubCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match &cli.command {
        Commands::Config(cmd) => cmd.run(&cli).await,
        Commands::Pub(cmd) => cmd.run(&cli).await,
        Commands::Sub(cmd) => cmd.run(&cli).await,
    }
}
