//! CLI commands module.

mod config;
mod publish;
mod subscribe;
mod util;

pub use config::ConfigCommand;
pub use publish::PubCommand;
pub use subscribe::SubCommand;

pub(crate) use util::*;
