//! Embeddable MQTT 3.1.1 client sessions.
//!
//! A [`Session`] owns one broker connection: it performs the handshake,
//! publishes messages, and routes incoming messages to subscription handlers
//! on a single background task. Connection-level problems are reported both
//! as typed errors and as [`SessionEvent`]s.
//!
//! # Example - Publish
//!
//! ```no_run
//! use mqttpad_session::{connect, ConnectionParameters, QoS};
//!
//! #[tokio::main]
//! async fn main() -> mqttpad_session::Result<()> {
//!     let session = connect(ConnectionParameters::new("127.0.0.1", 1883)).await?;
//!     session.publish("greetings", "hello", QoS::AtMostOnce, false).await?;
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Example - Subscribe
//!
//! ```no_run
//! use mqttpad_session::{ConnectionParameters, QoS, Session, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> mqttpad_session::Result<()> {
//!     let session = Session::new(ConnectionParameters::new("127.0.0.1", 1883))?;
//!     session.on_event(|event| {
//!         if let SessionEvent::ConnectionLost(err) = event {
//!             eprintln!("lost: {}", err);
//!         }
//!     });
//!     session.connect().await?;
//!
//!     let (_sub, mut rx) = session.subscribe_channel("sensors/#", QoS::AtMostOnce).await?;
//!     while let Some(msg) = rx.recv().await {
//!         println!("{}: {:?}", msg.topic, msg.payload_str());
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod event;
mod router;
mod session;
pub mod topic;
mod types;
mod writer;

pub use config::{
    ConnectionParameters, Credentials, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT,
};
pub use error::{ConnectError, Error, PublishError, Result, SubscribeError};
pub use event::{Observer, SessionEvent};
pub use router::{Handler, HandlerFunc, Subscription, SubscriptionId};
pub use session::{Session, connect};
pub use types::{Message, QoS, SessionState};
pub use writer::{TopicWriter, WriteOptions};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        ConnectionParameters, Error, Handler, Message, QoS, Result, Session, SessionEvent,
        SessionState, Subscription, TopicWriter, WriteOptions, connect,
    };
}
