//! Subscription routing.
//!
//! Incoming messages are matched against every registered topic filter and
//! handed to each matching subscription's handler once.

use crate::error::{Error, Result};
use crate::topic;
use crate::types::{Message, QoS};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handler trait for processing delivered messages.
///
/// Handlers run on the session's network task. Long-running work should be
/// handed off (see [`Session::subscribe_channel`](crate::Session::subscribe_channel)).
pub trait Handler: Send + Sync {
    /// Handle an incoming MQTT message.
    fn handle_message(&self, msg: &Message) -> Result<()>;
}

/// Handler function type.
pub type HandlerFunc = dyn Fn(&Message) -> Result<()> + Send + Sync;

/// Wrapper for handler functions.
pub(crate) struct FnHandler {
    f: Box<HandlerFunc>,
}

impl FnHandler {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl Handler for FnHandler {
    fn handle_message(&self, msg: &Message) -> Result<()> {
        (self.f)(msg)
    }
}

impl Handler for mpsc::UnboundedSender<Message> {
    fn handle_message(&self, msg: &Message) -> Result<()> {
        self.send(msg.clone())
            .map_err(|_| Error::Handler("receiver dropped".to_string()))
    }
}

/// Identifier of one registered subscription.
pub type SubscriptionId = u64;

/// Handle to an active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    filter: String,
    qos: QoS,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, filter: String, qos: QoS) -> Self {
        Self { id, filter, qos }
    }

    /// Unique id within the owning session.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic filter as sent to the broker.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Requested QoS.
    pub fn qos(&self) -> QoS {
        self.qos
    }
}

struct Route {
    id: SubscriptionId,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    match_any: Option<Box<TrieNode>>, // + wildcard
    match_all: Option<Box<TrieNode>>, // # wildcard
    routes: Vec<Route>,
}

impl TrieNode {
    fn insert(&mut self, filter: &str, route: Route) {
        let (first, rest) = split_level(filter);
        let node = match first {
            "+" => &mut **self.match_any.get_or_insert_with(Default::default),
            "#" => {
                self.match_all
                    .get_or_insert_with(Default::default)
                    .routes
                    .push(route);
                return;
            }
            _ => self.children.entry(first.to_string()).or_default(),
        };
        match rest {
            Some(rest) => node.insert(rest, route),
            None => node.routes.push(route),
        }
    }

    /// Remove routes for which `pred` holds. Returns the number removed.
    fn remove<P>(&mut self, filter: &str, pred: &P) -> usize
    where
        P: Fn(&Route) -> bool,
    {
        let (first, rest) = split_level(filter);
        match first {
            "#" => {
                let Some(node) = self.match_all.as_deref_mut() else {
                    return 0;
                };
                let removed = node.retain_routes(pred);
                if node.is_empty() {
                    self.match_all = None;
                }
                removed
            }
            "+" => {
                let Some(node) = self.match_any.as_deref_mut() else {
                    return 0;
                };
                let removed = node.remove_rest(rest, pred);
                if node.is_empty() {
                    self.match_any = None;
                }
                removed
            }
            _ => {
                let Some(node) = self.children.get_mut(first) else {
                    return 0;
                };
                let removed = node.remove_rest(rest, pred);
                if node.is_empty() {
                    self.children.remove(first);
                }
                removed
            }
        }
    }

    fn remove_rest<P>(&mut self, rest: Option<&str>, pred: &P) -> usize
    where
        P: Fn(&Route) -> bool,
    {
        match rest {
            Some(rest) => self.remove(rest, pred),
            None => self.retain_routes(pred),
        }
    }

    fn retain_routes<P>(&mut self, pred: &P) -> usize
    where
        P: Fn(&Route) -> bool,
    {
        let before = self.routes.len();
        self.routes.retain(|r| !pred(r));
        before - self.routes.len()
    }

    fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.children.is_empty()
            && self.match_any.is_none()
            && self.match_all.is_none()
    }

    /// Collect every handler whose filter matches `topic`.
    fn collect(&self, topic: &str, root: bool, out: &mut Vec<Arc<dyn Handler>>) {
        let wildcards_allowed = !(root && topic.starts_with('$'));

        if wildcards_allowed {
            if let Some(ref match_all) = self.match_all {
                out.extend(match_all.routes.iter().map(|r| r.handler.clone()));
            }
        }

        let (first, rest) = split_level(topic);

        if let Some(child) = self.children.get(first) {
            child.collect_rest(rest, out);
        }
        if wildcards_allowed {
            if let Some(ref match_any) = self.match_any {
                match_any.collect_rest(rest, out);
            }
        }
    }

    fn collect_rest(&self, rest: Option<&str>, out: &mut Vec<Arc<dyn Handler>>) {
        match rest {
            Some(rest) => self.collect(rest, false, out),
            None => {
                out.extend(self.routes.iter().map(|r| r.handler.clone()));
                // "a/#" also matches "a".
                if let Some(ref match_all) = self.match_all {
                    out.extend(match_all.routes.iter().map(|r| r.handler.clone()));
                }
            }
        }
    }

    /// Walk the trie and call the function for each node with its path.
    fn walk_with_path<F>(&self, path: Vec<String>, f: &mut F)
    where
        F: FnMut(&[String], &TrieNode),
    {
        for (seg, child) in &self.children {
            let mut new_path = path.clone();
            new_path.push(seg.clone());
            child.walk_with_path(new_path, f);
        }

        if let Some(ref match_any) = self.match_any {
            let mut new_path = path.clone();
            new_path.push("+".to_string());
            match_any.walk_with_path(new_path, f);
        }

        if let Some(ref match_all) = self.match_all {
            let mut new_path = path.clone();
            new_path.push("#".to_string());
            match_all.walk_with_path(new_path, f);
        }

        f(&path, self);
    }
}

fn split_level(s: &str) -> (&str, Option<&str>) {
    match s.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (s, None),
    }
}

/// Strip the `$share/<group>/` prefix; routing uses the underlying filter.
fn routing_filter(filter: &str) -> &str {
    match topic::split_shared(filter) {
        Some(Ok((_, inner))) => inner,
        _ => filter,
    }
}

#[derive(Default)]
struct RouterInner {
    root: TrieNode,
    /// Broker-side filters and how many local subscriptions use each.
    filters: HashMap<String, (usize, QoS)>,
    next_id: SubscriptionId,
}

/// Thread-safe subscription registry.
#[derive(Default)]
pub(crate) struct Router {
    inner: RwLock<RouterInner>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns the subscription and whether the filter
    /// is new, i.e. must be sent to the broker.
    pub(crate) fn add(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn Handler>,
    ) -> (Subscription, bool) {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;

        inner
            .root
            .insert(routing_filter(filter), Route { id, handler });

        let entry = inner.filters.entry(filter.to_string()).or_insert((0, qos));
        entry.0 += 1;
        let first = entry.0 == 1;

        (Subscription::new(id, filter.to_string(), qos), first)
    }

    /// Remove one subscription. Returns `None` if it was not registered,
    /// otherwise whether it was the last user of its filter.
    pub(crate) fn remove(&self, sub: &Subscription) -> Option<bool> {
        let mut inner = self.inner.write();
        let removed = inner
            .root
            .remove(routing_filter(&sub.filter), &|r: &Route| r.id == sub.id);
        if removed == 0 {
            return None;
        }

        let last = match inner.filters.get_mut(&sub.filter) {
            Some(entry) if entry.0 > 1 => {
                entry.0 -= 1;
                false
            }
            _ => {
                inner.filters.remove(&sub.filter);
                true
            }
        };
        Some(last)
    }

    /// Drop every subscription on `filter`. Returns the number removed.
    pub(crate) fn remove_filter(&self, filter: &str) -> usize {
        let mut inner = self.inner.write();
        inner.filters.remove(filter);
        inner.root.remove(routing_filter(filter), &|_: &Route| true)
    }

    /// Handlers for all subscriptions matching `topic`.
    pub(crate) fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn Handler>> {
        let mut out = Vec::new();
        self.inner.read().root.collect(topic, true, &mut out);
        out
    }

    /// Broker-side filters currently in use, with their QoS.
    pub(crate) fn filters(&self) -> Vec<(String, QoS)> {
        self.inner
            .read()
            .filters
            .iter()
            .map(|(f, (_, qos))| (f.clone(), *qos))
            .collect()
    }

    /// Filters to request at the broker: local filters no broader local
    /// filter covers. Each carries the highest QoS among the filters it
    /// covers.
    pub(crate) fn broker_filters(&self) -> Vec<(String, QoS)> {
        let local = self.filters();
        local
            .iter()
            .filter(|(f, _)| {
                !local
                    .iter()
                    .any(|(g, _)| g != f && topic::covers(g, f) && !topic::covers(f, g))
            })
            .map(|(f, _)| {
                let qos = local
                    .iter()
                    .filter(|(other, _)| topic::covers(f, other))
                    .map(|(_, q)| *q)
                    .max_by_key(|q| u8::from(*q))
                    .unwrap_or_default();
                (f.clone(), qos)
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write();
        inner.root = TrieNode::default();
        inner.filters.clear();
    }

    /// Route a message to every matching handler. Returns the handler errors.
    pub(crate) fn dispatch(&self, msg: &Message) -> Vec<Error> {
        // Handlers run without the lock held so they may (un)subscribe.
        self.handlers_for(&msg.topic)
            .into_iter()
            .filter_map(|h| h.handle_message(msg).err())
            .collect()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.inner.read().root.walk_with_path(Vec::new(), &mut |path, node| {
            if !node.routes.is_empty() {
                lines.push(format!("{}: {} handlers", path.join("/"), node.routes.len()));
            }
        });
        lines.sort();
        write!(f, "Router {{ {} }}", lines.join(", "))
    }
}
