//! Broker context management commands.

use clap::{Args, Subcommand};
use mqttpad_cli::config::{Context as CliContext, mask_password};
use mqttpad_session::{DEFAULT_KEEP_ALIVE, DEFAULT_PORT};

use super::{get_config, print_success};
use crate::Cli;

/// Manage broker contexts.
///
/// Configuration is stored in ~/.mqttpad/mqttpad/config.yaml
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Add or replace a context
    #[command(name = "add-context")]
    AddContext {
        /// Context name
        name: String,
        /// Broker host
        #[arg(long)]
        host: String,
        /// Broker port
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Keep-alive interval in seconds
        #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE)]
        keepalive: u16,
        /// Username
        #[arg(long)]
        username: Option<String>,
        /// Password
        #[arg(long)]
        password: Option<String>,
        /// Client ID
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Delete a context
    #[command(name = "delete-context")]
    DeleteContext {
        /// Context name
        name: String,
    },
    /// Set the current context
    #[command(name = "use-context")]
    UseContext {
        /// Context name
        name: String,
    },
    /// Display the current context
    #[command(name = "get-context")]
    GetContext,
    /// List all contexts
    #[command(name = "list-contexts", alias = "get-contexts")]
    ListContexts,
    /// View the current configuration
    View,
}

impl ConfigCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            ConfigSubcommand::AddContext {
                name,
                host,
                port,
                keepalive,
                username,
                password,
                client_id,
            } => {
                let mut cfg = get_config(cli)?;
                let ctx = CliContext {
                    host: host.clone(),
                    port: *port,
                    keep_alive: *keepalive,
                    username: username.clone().unwrap_or_default(),
                    password: password.clone().unwrap_or_default(),
                    client_id: client_id.clone().unwrap_or_default(),
                    ..Default::default()
                };
                cfg.add_context(name, ctx)?;
                print_success(&format!("Context \"{}\" added successfully", name));
                Ok(())
            }

            ConfigSubcommand::DeleteContext { name } => {
                let mut cfg = get_config(cli)?;
                cfg.delete_context(name)?;
                print_success(&format!("Context \"{}\" deleted", name));
                Ok(())
            }

            ConfigSubcommand::UseContext { name } => {
                let mut cfg = get_config(cli)?;
                cfg.use_context(name)?;
                print_success(&format!("Switched to context \"{}\"", name));
                Ok(())
            }

            ConfigSubcommand::GetContext => {
                let cfg = get_config(cli)?;
                if cfg.current_context.is_empty() {
                    println!("No current context set");
                } else {
                    println!("{}", cfg.current_context);
                }
                Ok(())
            }

            ConfigSubcommand::ListContexts => {
                let cfg = get_config(cli)?;
                if cfg.contexts.is_empty() {
                    println!("No contexts configured");
                    return Ok(());
                }

                println!("{:<8} {:<20} {:<30} {}", "CURRENT", "NAME", "BROKER", "USERNAME");
                for (name, ctx) in cfg.list_contexts().into_iter().filter_map(|n| {
                    cfg.get_context(n).map(|ctx| (n, ctx))
                }) {
                    let current = if name == cfg.current_context { "*" } else { "" };
                    let broker = format!("{}:{}", ctx.host, ctx.port);
                    println!("{:<8} {:<20} {:<30} {}", current, name, broker, ctx.username);
                }
                Ok(())
            }

            ConfigSubcommand::View => {
                let cfg = get_config(cli)?;

                println!("Config file: {}", cfg.path().display());
                println!("Current context: {}", cfg.current_context);
                println!("Contexts: {}", cfg.contexts.len());

                for name in cfg.list_contexts() {
                    let Some(ctx) = cfg.get_context(name) else {
                        continue;
                    };
                    println!("\n  {}:", name);
                    println!("    Broker: {}:{}", ctx.host, ctx.port);
                    println!("    Keep-alive: {}s", ctx.keep_alive);
                    if !ctx.username.is_empty() {
                        println!("    Username: {}", ctx.username);
                        println!("    Password: {}", mask_password(&ctx.password));
                    }
                    if !ctx.client_id.is_empty() {
                        println!("    Client ID: {}", ctx.client_id);
                    }
                }
                Ok(())
            }
        }
    }
}
