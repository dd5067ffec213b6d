//! Fixed-topic publishing.

use crate::error::{PublishError, Result};
use crate::session::Session;
use crate::topic;
use crate::types::QoS;
use bytes::Bytes;

/// Options applied to every message written by a [`TopicWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl WriteOptions {
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Publishes to one topic through a [`Session`].
///
/// The topic name is validated once, when the writer is created.
#[derive(Debug, Clone)]
pub struct TopicWriter {
    name: String,
    options: WriteOptions,
    session: Session,
}

impl TopicWriter {
    pub fn new(session: Session, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        topic::validate_topic(&name).map_err(PublishError::InvalidTopic)?;
        Ok(Self {
            name,
            options: WriteOptions::default(),
            session,
        })
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> WriteOptions {
        self.options
    }

    /// Publish `payload` to the topic.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.session
            .publish(&self.name, payload, self.options.qos, self.options.retain)
            .await
    }
}
