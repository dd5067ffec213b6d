//! MQTT session implementation using rumqttc.
//!
//! A [`Session`] owns exactly one broker connection. A single background
//! task drives the network and invokes delivery handlers; callers only
//! enqueue requests.

use crate::config::ConnectionParameters;
use crate::error::{ConnectError, Error, PublishError, Result, SubscribeError};
use crate::event::{Observer, SessionEvent};
use crate::router::{FnHandler, Handler, Router, Subscription};
use crate::topic;
use crate::types::{Message, QoS, SessionState};
use crate::writer::TopicWriter;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Outgoing, Packet, SubAck, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the request queue between callers and the network task.
const REQUEST_CAPACITY: usize = 100;

/// How long `disconnect` waits for DISCONNECT to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Handle to one MQTT broker session.
///
/// Cheap to clone; all clones refer to the same connection, so any task may
/// call [`disconnect`](Session::disconnect). Dropping the last handle cancels
/// the network task and closes the socket.
///
/// # Example
///
/// ```no_run
/// use mqttpad_session::{ConnectionParameters, QoS, Session};
///
/// #[tokio::main]
/// async fn main() -> mqttpad_session::Result<()> {
///     let session = Session::new(ConnectionParameters::new("127.0.0.1", 1883))?;
///     session.connect().await?;
///
///     session.subscribe("sensors/+/temp", |msg| {
///         println!("{}: {:?}", msg.topic, msg.payload);
///         Ok(())
///     }).await?;
///     session.publish("sensors/kitchen/temp", "21.5", QoS::AtMostOnce, false).await?;
///
///     session.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    params: ConnectionParameters,
    client_id: String,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

/// The live connection: request queue, network task and its cancel switch.
struct Link {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared with the network task.
struct Shared {
    state: watch::Sender<SessionState>,
    closed: AtomicBool,
    router: Router,
    observer: RwLock<Option<Observer>>,
    broker_subs: Mutex<BrokerSubscriptions>,
}

/// Filters requested at the broker, and the packet ids of their SUBSCRIBEs
/// so SUBACK failures can be reported.
#[derive(Default)]
struct BrokerSubscriptions {
    /// Filters subscribed at the broker, with the QoS requested.
    active: HashMap<String, QoS>,
    /// Filters queued to the network task, in request order.
    queued: VecDeque<String>,
    /// Filters sent and awaiting SUBACK, by packet id.
    in_flight: HashMap<u16, String>,
}

impl BrokerSubscriptions {
    fn clear(&mut self) {
        self.active.clear();
        self.queued.clear();
        self.in_flight.clear();
    }
}

/// Connect to a broker with the given parameters.
///
/// Equivalent to `Session::new(params)?` followed by `connect()`.
pub async fn connect(params: ConnectionParameters) -> Result<Session> {
    let session = Session::new(params)?;
    session.connect().await?;
    Ok(session)
}

impl Session {
    /// Create a disconnected session. Parameters are validated here.
    pub fn new(params: ConnectionParameters) -> Result<Self> {
        params.validate()?;

        let client_id = params
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                params,
                client_id,
                shared: Arc::new(Shared {
                    state,
                    closed: AtomicBool::new(false),
                    router: Router::new(),
                    observer: RwLock::new(None),
                    broker_subs: Mutex::new(BrokerSubscriptions::default()),
                }),
                link: Mutex::new(None),
            }),
        })
    }

    /// Install the status observer. Replaces any previous one.
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        *self.inner.shared.observer.write() = Some(Arc::new(f));
    }

    /// Establish the connection and perform the handshake.
    ///
    /// Waits for CONNACK, bounded by
    /// [`handshake_timeout`](ConnectionParameters::handshake_timeout). On
    /// failure the session moves to [`SessionState::Failed`] and cannot be
    /// reused. After a broker-initiated closure this may be called again;
    /// existing subscriptions are re-sent to the broker.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.inner.shared;

        let mut refused = None;
        shared.state.send_if_modified(|state| {
            if shared.closed.load(Ordering::SeqCst) {
                refused = Some(Error::SessionClosed);
                return false;
            }
            match *state {
                SessionState::Disconnected => {
                    *state = SessionState::Connecting;
                    true
                }
                SessionState::Failed => {
                    refused = Some(ConnectError::Failed.into());
                    false
                }
                SessionState::Connecting | SessionState::Connected => {
                    refused = Some(ConnectError::AlreadyConnected.into());
                    false
                }
            }
        });
        if let Some(err) = refused {
            return Err(err);
        }

        let params = &self.inner.params;
        let options = params.to_mqtt_options(&self.inner.client_id);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let timeout = params.handshake_timeout();

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            params.host, params.port, self.inner.client_id
        );

        let result = match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::HandshakeTimeout(timeout)),
        };

        let mut link = self.inner.link.lock();

        if shared.closed.load(Ordering::SeqCst) {
            debug!("Session closed during handshake");
            shared.state.send_replace(SessionState::Disconnected);
            return Err(Error::SessionClosed);
        }

        if let Err(err) = result {
            warn!("Handshake with {}:{} failed: {}", params.host, params.port, err);
            shared.state.send_replace(SessionState::Failed);
            return Err(err.into());
        }

        if let Some(old) = link.take() {
            old.cancel.cancel();
            old.task.abort();
        }

        // Re-register filters kept from a previous connection.
        shared.broker_subs.lock().clear();
        if let Err(e) = shared.sync_broker_filters(&client) {
            error!("Resubscribe failed: {}", e);
        }

        // Connected is published before the task starts so a quick
        // connection loss cannot be overwritten.
        shared.state.send_replace(SessionState::Connected);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            shared.clone(),
            client.clone(),
            event_loop,
            cancel.clone(),
        ));
        *link = Some(Link {
            client,
            cancel,
            task,
        });
        drop(link);

        info!("Connected to MQTT broker");
        shared.notify(&SessionEvent::Connected);
        Ok(())
    }

    /// Publish a message.
    ///
    /// Enqueues the message for the network task and returns; QoS 0 is
    /// fire-and-forget. QoS 1 and 2 are passed to the protocol library,
    /// which handles acknowledgment, but per-message acks are not reported.
    ///
    /// A message whose PUBLISH packet would exceed
    /// [`max_packet_size`](ConnectionParameters::max_packet_size) fails with
    /// [`PublishError::Rejected`] and the connection is left untouched.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        let Some(client) = self.connected_client()? else {
            return Err(PublishError::NotConnected.into());
        };
        topic::validate_topic(topic).map_err(PublishError::InvalidTopic)?;

        let payload = payload.into();
        let size = publish_packet_size(topic, payload.len(), qos);
        let limit = self.inner.params.max_packet_size;
        if size > limit {
            return Err(PublishError::Rejected(format!(
                "packet of {} bytes exceeds the {} byte limit",
                size, limit
            ))
            .into());
        }

        client
            .publish_bytes(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| self.request_failed(e, PublishError::NotConnected))?;

        debug!("Published to {} (qos={}, retain={})", topic, qos, retain);
        Ok(())
    }

    /// Publish a prepared [`Message`].
    pub async fn publish_message(&self, msg: Message) -> Result<()> {
        self.publish(&msg.topic, msg.payload, msg.qos, msg.retain).await
    }

    /// Subscribe to a topic filter at QoS 0 with a handler function.
    ///
    /// The handler runs on the session's network task once per matching
    /// message.
    pub async fn subscribe<F>(&self, filter: &str, f: F) -> Result<Subscription>
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(filter, QoS::AtMostOnce, Arc::new(FnHandler::new(f)))
            .await
    }

    /// Subscribe to a topic filter with a [`Handler`].
    ///
    /// The broker is only asked for filters no broader local filter already
    /// covers, so a message matching `a/#` and `a/+` arrives once and each
    /// handler runs once. The broker filter carries the highest QoS of the
    /// filters it covers.
    pub async fn subscribe_handler(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> Result<Subscription> {
        let Some(client) = self.connected_client()? else {
            return Err(SubscribeError::NotConnected.into());
        };
        topic::validate_filter(filter).map_err(SubscribeError::InvalidFilter)?;

        let shared = &self.inner.shared;
        let (sub, first) = shared.router.add(filter, qos, handler);

        // A concurrent disconnect may have cleared the router before the add.
        if self.is_closed() {
            shared.router.remove(&sub);
            return Err(Error::SessionClosed);
        }

        if first {
            if let Err(e) = shared.sync_broker_filters(&client) {
                shared.router.remove(&sub);
                let reason = e.to_string();
                return Err(self.request_failed(e, SubscribeError::Rejected(reason)));
            }
        }

        debug!("Subscribed to {} (id={}, qos={})", filter, sub.id(), qos);
        Ok(sub)
    }

    /// Subscribe and receive matching messages through a channel.
    ///
    /// The channel is the hand-off point for callers that must process
    /// messages on their own task.
    pub async fn subscribe_channel(
        &self,
        filter: &str,
        qos: QoS,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Message>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe_handler(filter, qos, Arc::new(tx)).await?;
        Ok((sub, rx))
    }

    /// Remove a subscription.
    ///
    /// The handler is removed locally right away. UNSUBSCRIBE is sent once
    /// no other subscription uses the same filter; filters it covered are
    /// subscribed on their own first.
    pub async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        let shared = &self.inner.shared;
        let removed = shared.router.remove(sub);
        let Some(client) = self.connected_client()? else {
            return Err(SubscribeError::NotConnected.into());
        };

        if removed == Some(true) {
            shared
                .sync_broker_filters(&client)
                .map_err(|e| self.request_failed(e, SubscribeError::NotConnected))?;
            debug!("Unsubscribed from {}", sub.filter());
        }
        Ok(())
    }

    /// Close the session.
    ///
    /// Idempotent. Sends DISCONNECT if connected, stops the network task and
    /// drops every subscription; no handler is invoked afterwards. All later
    /// operations fail with [`Error::SessionClosed`].
    pub async fn disconnect(&self) {
        let shared = &self.inner.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            debug!("Session already closed");
            return;
        }

        shared.router.clear();
        shared.broker_subs.lock().clear();

        let link = self.inner.link.lock().take();
        if let Some(mut link) = link {
            let connected = *shared.state.borrow() == SessionState::Connected;
            // The network task exits on its own once DISCONNECT is flushed.
            let finished = connected
                && link.client.try_disconnect().is_ok()
                && tokio::time::timeout(DISCONNECT_GRACE, &mut link.task)
                    .await
                    .is_ok();
            if !finished {
                link.cancel.cancel();
                link.task.abort();
                if let Err(e) = link.task.await {
                    if !e.is_cancelled() {
                        warn!("Network task ended abnormally: {}", e);
                    }
                }
            }
        }

        shared.state.send_if_modified(|state| {
            if *state == SessionState::Failed || *state == SessionState::Disconnected {
                return false;
            }
            *state = SessionState::Disconnected;
            true
        });
        info!("Session {} disconnected", self.inner.client_id);
    }

    /// Create a [`TopicWriter`] bound to this session.
    pub fn topic_writer(&self, topic: impl Into<String>) -> Result<TopicWriter> {
        TopicWriter::new(self.clone(), topic)
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.inner.shared.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.state.subscribe()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Check if `disconnect` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }

    /// The parameters this session was created with.
    pub fn params(&self) -> &ConnectionParameters {
        &self.inner.params
    }

    /// Client ID presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// The request queue, if the session is usable for publish/subscribe.
    fn connected_client(&self) -> Result<Option<AsyncClient>> {
        let client = if self.is_connected() {
            self.inner.link.lock().as_ref().map(|l| l.client.clone())
        } else {
            None
        };
        // Checked last: disconnect sets the flag before tearing down the link.
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(client)
    }

    /// Classify a request the network task did not accept.
    fn request_failed<E: Into<Error>>(&self, err: ClientError, otherwise: E) -> Error {
        if self.is_closed() {
            return Error::SessionClosed;
        }
        debug!("Request not accepted by network task: {}", err);
        otherwise.into()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.inner.client_id)
            .field("host", &self.inner.params.host)
            .field("port", &self.inner.params.port)
            .field("state", &self.state())
            .field("router", &self.inner.shared.router)
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.cancel.cancel();
            link.task.abort();
        }
    }
}

impl Shared {
    fn notify(&self, event: &SessionEvent) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }

    fn deliver(&self, msg: Message) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Dropping message on {} after disconnect", msg.topic);
            return;
        }

        for error in self.router.dispatch(&msg) {
            warn!("Handler for {} failed: {}", msg.topic, error);
            self.notify(&SessionEvent::HandlerFailed {
                topic: msg.topic.clone(),
                error,
            });
        }
    }

    /// Bring the broker's filters in line with the local subscriptions.
    ///
    /// Filters covered by a broader local filter are left out. New filters
    /// are subscribed before stale ones are dropped so no message falls in
    /// between.
    fn sync_broker_filters(&self, client: &AsyncClient) -> std::result::Result<(), ClientError> {
        // Held across try_subscribe so the queue stays in request order.
        let mut subs = self.broker_subs.lock();
        let wanted: HashMap<String, QoS> = self.router.broker_filters().into_iter().collect();

        for (filter, qos) in &wanted {
            if subs.active.get(filter) == Some(qos) {
                continue;
            }
            client.try_subscribe(filter, (*qos).into())?;
            subs.queued.push_back(filter.clone());
            subs.active.insert(filter.clone(), *qos);
            debug!("Subscribing to {} at broker (qos={})", filter, qos);
        }

        let stale: Vec<String> = subs
            .active
            .keys()
            .filter(|f| !wanted.contains_key(*f))
            .cloned()
            .collect();
        for filter in stale {
            client.try_unsubscribe(&filter)?;
            subs.active.remove(&filter);
            debug!("Unsubscribing from {} at broker", filter);
        }
        Ok(())
    }

    fn on_subscribe_sent(&self, pkid: u16) {
        let mut subs = self.broker_subs.lock();
        if let Some(filter) = subs.queued.pop_front() {
            subs.in_flight.insert(pkid, filter);
        }
    }

    fn on_suback(&self, client: &AsyncClient, suback: SubAck) {
        let filter = self.broker_subs.lock().in_flight.remove(&suback.pkid);
        let Some(filter) = filter else {
            debug!("SUBACK for unknown packet {}", suback.pkid);
            return;
        };

        let rejected = suback
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        if !rejected {
            debug!("Subscription to {} acknowledged", filter);
            return;
        }

        let removed = self.router.remove_filter(&filter);
        self.broker_subs.lock().active.remove(&filter);
        warn!("Broker rejected subscription to {} ({} handlers removed)", filter, removed);
        self.notify(&SessionEvent::SubscriptionRejected { filter });

        // Filters the rejected one covered now need their own SUBSCRIBE.
        if let Err(e) = self.sync_broker_filters(client) {
            error!("Resubscribe after rejection failed: {}", e);
        }
    }

    fn connection_lost(&self, err: ConnectError) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        error!("Connection lost: {}", err);
        self.state.send_replace(SessionState::Disconnected);
        self.notify(&SessionEvent::ConnectionLost(err.into()));
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> std::result::Result<(), ConnectError> {
    loop {
        match event_loop.poll().await? {
            Event::Incoming(Packet::ConnAck(connack)) => {
                debug!("CONNACK received, session_present={}", connack.session_present);
                return Ok(());
            }
            event => debug!("Event before CONNACK: {:?}", event),
        }
    }
}

/// Size of the encoded PUBLISH packet, counted the way the protocol
/// library checks it against the outgoing limit.
fn publish_packet_size(topic: &str, payload_len: usize, qos: QoS) -> usize {
    let mut len = 2 + topic.len() + payload_len;
    if qos != QoS::AtMostOnce {
        len += 2; // packet id
    }
    let len_len = match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + len_len + len
}

async fn run_event_loop(
    shared: Arc<Shared>,
    client: AsyncClient,
    mut event_loop: EventLoop,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Network task cancelled");
                break;
            }
            event = event_loop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("Received message on topic: {}", publish.topic);
                        shared.deliver(Message::from(publish));
                    }
                    Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                        shared.on_subscribe_sent(pkid);
                    }
                    Ok(Event::Incoming(Packet::SubAck(suback))) => {
                        shared.on_suback(&client, suback);
                    }
                    Ok(Event::Incoming(Packet::PubAck(puback))) => {
                        debug!("Publish acknowledged: {}", puback.pkid);
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("DISCONNECT sent");
                        break;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        shared.connection_lost(ConnectError::Lost("broker sent DISCONNECT".to_string()));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        shared.connection_lost(ConnectError::Lost(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
}
