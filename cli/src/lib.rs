//! CLI utilities for mqttpad.
//!
//! Broker profiles stored as YAML, and formatting of received messages.

pub mod config;
pub mod output;

pub use config::{Config, Context, load_config, mask_password};
pub use output::{MessageRecord, OutputFormat, format_message};
