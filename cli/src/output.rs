//! Output utilities for received messages.

use mqttpad_session::Message;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One human-readable line per message (default).
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// JSON shape of a received message.
#[derive(Debug, Serialize)]
pub struct MessageRecord<'a> {
    pub topic: &'a str,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

impl<'a> From<&'a Message> for MessageRecord<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            topic: &msg.topic,
            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
            qos: msg.qos.into(),
            retain: msg.retain,
        }
    }
}

/// Render a received message as a single line.
pub fn format_message(msg: &Message, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(format!(
            "Received message on topic {}: {}",
            msg.topic,
            String::from_utf8_lossy(&msg.payload)
        )),
        OutputFormat::Json => Ok(serde_json::to_string(&MessageRecord::from(msg))?),
    }
}
