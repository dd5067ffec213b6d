//! Shared helpers for commands.

use clap::Args;
use mqttpad_cli::{Config, Context, load_config};
use mqttpad_session::{ConnectionParameters, QoS};

use crate::Cli;

pub const APP_NAME: &str = "mqttpad";

/// Broker flags shared by `pub` and `sub`. Each one overrides the context.
#[derive(Args, Debug, Default)]
pub struct BrokerArgs {
    /// Broker host
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port [default: 1883]
    #[arg(long)]
    pub port: Option<u16>,

    /// Keep-alive interval in seconds [default: 60]
    #[arg(long)]
    pub keepalive: Option<u16>,

    /// Username
    #[arg(long)]
    pub username: Option<String>,

    /// Password
    #[arg(long)]
    pub password: Option<String>,

    /// Client ID (random if omitted)
    #[arg(long)]
    pub client_id: Option<String>,
}

impl BrokerArgs {
    /// Apply the flags on top of a context.
    pub fn apply(&self, ctx: &mut Context) {
        if let Some(host) = &self.host {
            ctx.host = host.clone();
        }
        if let Some(port) = self.port {
            ctx.port = port;
        }
        if let Some(keepalive) = self.keepalive {
            ctx.keep_alive = keepalive;
        }
        if let Some(username) = &self.username {
            ctx.username = username.clone();
        }
        if let Some(password) = &self.password {
            ctx.password = password.clone();
        }
        if let Some(client_id) = &self.client_id {
            ctx.client_id = client_id.clone();
        }
    }
}

/// Loads the configuration file.
pub fn get_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config(APP_NAME, cli.config.as_deref())
}

/// Gets the context to use.
///
/// An explicitly named context must exist. Without one, the current context
/// is used, falling back to defaults.
pub fn get_context(cli: &Cli) -> anyhow::Result<Context> {
    let cfg = get_config(cli)?;

    match cfg.resolve_context(cli.context.as_deref()) {
        Some(ctx) => Ok(ctx.clone()),
        None => match &cli.context {
            Some(name) => anyhow::bail!(
                "context '{}' not found. Use 'mqttpad config list-contexts' to see available contexts",
                name
            ),
            None => Ok(Context::default()),
        },
    }
}

/// Builds session parameters from the context and broker flags.
pub fn connection_params(cli: &Cli, args: &BrokerArgs) -> anyhow::Result<ConnectionParameters> {
    let mut ctx = get_context(cli)?;
    args.apply(&mut ctx);

    let params = ctx.to_params();
    params.validate()?;
    Ok(params)
}

/// Parses a QoS flag value.
pub fn parse_qos(s: &str) -> Result<QoS, String> {
    let level: u8 = s.parse().map_err(|_| format!("invalid QoS '{}'", s))?;
    QoS::try_from(level)
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}
