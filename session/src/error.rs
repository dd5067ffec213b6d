//! Error types for MQTT sessions.

use std::time::Duration;

use thiserror::Error;

/// Error type for session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection could not be established or was lost.
    #[error("mqtt: connect: {0}")]
    Connect(#[from] ConnectError),

    /// Publish was refused.
    #[error("mqtt: publish: {0}")]
    Publish(#[from] PublishError),

    /// Subscribe or unsubscribe was refused.
    #[error("mqtt: subscribe: {0}")]
    Subscribe(#[from] SubscribeError),

    /// Operation attempted after `disconnect`.
    #[error("mqtt: session closed")]
    SessionClosed,

    /// A delivery handler reported a failure.
    #[error("mqtt: handler error: {0}")]
    Handler(String),
}

/// Reasons a connection attempt fails.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Parameters were rejected before any network traffic.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Host could not be resolved or reached.
    #[error("broker unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    /// Broker rejected the credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Broker refused the connection for another reason.
    #[error("connection refused: {0}")]
    Refused(String),

    /// No CONNACK within the handshake deadline.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Session is already connecting or connected.
    #[error("session already connected")]
    AlreadyConnected,

    /// A previous handshake failed; a new session is required.
    #[error("session failed, create a new session")]
    Failed,

    /// Connection dropped by the broker or the network.
    #[error("connection lost: {0}")]
    Lost(String),

    /// Any other protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Reasons a publish is refused.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Session is not in the Connected state.
    #[error("session not connected")]
    NotConnected,

    /// Topic name is malformed.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The message cannot be sent, e.g. its packet exceeds the size limit.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Reasons a subscribe or unsubscribe is refused.
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// Session is not in the Connected state.
    #[error("session not connected")]
    NotConnected,

    /// Topic filter is malformed.
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),

    /// The request could not be queued for the network task.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<rumqttc::ConnectionError> for ConnectError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        use rumqttc::{ConnectReturnCode, ConnectionError};

        match err {
            ConnectionError::Io(e) => ConnectError::Unreachable(e),
            ConnectionError::ConnectionRefused(
                code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
            ) => ConnectError::AuthRejected(format!("{:?}", code)),
            ConnectionError::ConnectionRefused(code) => ConnectError::Refused(format!("{:?}", code)),
            ConnectionError::NetworkTimeout => ConnectError::Unreachable(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "network timeout",
            )),
            other => ConnectError::Protocol(other.to_string()),
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
