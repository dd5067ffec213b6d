//! Asynchronous status notifications.

use std::sync::Arc;

use crate::error::Error;

/// Status change reported by a session's network task.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake completed.
    Connected,
    /// The broker or the network closed the connection. No reconnect is
    /// attempted; call [`Session::connect`](crate::Session::connect) to retry.
    ConnectionLost(Error),
    /// The broker refused a subscription in its SUBACK. The local
    /// registration for `filter` has been removed.
    SubscriptionRejected { filter: String },
    /// A delivery handler returned an error.
    HandlerFailed { topic: String, error: Error },
}

/// Callback receiving [`SessionEvent`]s.
///
/// Invoked on the session's network task.
pub type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
