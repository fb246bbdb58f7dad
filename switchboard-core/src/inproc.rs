//! In-process backend, registered as `inproc`.
//!
//! Connections never leave the process: `dial` only records the endpoint
//! name (`host:port`) and the streaming loops talk through `flume` channels
//! kept in `DashMap`s.
//!
//! - **Queues and sockets**: one shared channel per `(endpoint, address)`.
//!   Several receivers compete for messages; each message reaches one of them.
//! - **Topics**: every active `recv_from` on `(endpoint, topic)` gets its own
//!   copy. Messages published while nobody listens are dropped.
//!
//! Queues outlive the connections that created them so a consumer can pick
//! up what an earlier producer left behind. `close` drops the endpoint's
//! queues that are empty and not in use by a running loop.
//!
//! ```rust
//! use switchboard_core::inproc::InprocProtocol;
//! use switchboard_core::protocol::Protocol;
//!
//! let inproc = InprocProtocol::new();
//! assert_eq!(inproc.name(), "inproc");
//! assert!(inproc.init(&[]).is_ok());
//! assert!(inproc.init(&["user".to_string()]).is_err());
//! ```

use crate::cancel::CancelSignal;
use crate::destination::Destination;
use crate::error::{Result, SwitchboardError};
use crate::handle::{ConnectionHandle, HandleSequence};
use crate::protocol::Protocol;
use crate::stream::{run_inbound, run_outbound, MessageSink, MessageSource};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender};
use tracing::{debug, trace};

/// Registry name of the in-process backend.
pub const INPROC: &str = "inproc";

type ChannelKey = (String, String);

/// In-process transport.
#[derive(Debug, Default)]
pub struct InprocProtocol {
    handles: HandleSequence,
    connections: DashMap<ConnectionHandle, String>,
    queues: DashMap<ChannelKey, (Sender<Bytes>, Receiver<Bytes>)>,
    topics: DashMap<ChannelKey, Vec<Sender<Bytes>>>,
}

impl InprocProtocol {
    /// Backend with no endpoints yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections (dialed and not closed).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of queue channels currently kept, across all endpoints.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    fn endpoint(&self, handle: ConnectionHandle) -> Result<String> {
        self.connections
            .get(&handle)
            .map(|e| e.value().clone())
            .ok_or_else(|| SwitchboardError::transport(format!("unknown connection {handle}")))
    }

    fn queue(&self, key: ChannelKey) -> (Sender<Bytes>, Receiver<Bytes>) {
        self.queues
            .entry(key)
            .or_insert_with(flume::unbounded)
            .value()
            .clone()
    }

    fn subscribe(&self, key: ChannelKey) -> Receiver<Bytes> {
        let (tx, rx) = flume::unbounded();
        self.topics.entry(key).or_default().push(tx);
        rx
    }

    /// Forget the endpoint's queues that hold nothing and that only the map
    /// still references.
    fn prune_queues(&self, endpoint: &str) {
        self.queues.retain(|(owner, _), (tx, rx)| {
            owner != endpoint || tx.sender_count() > 1 || rx.receiver_count() > 1 || !rx.is_empty()
        });
    }

    /// Drop senders whose subscriber went away. Call after dropping the receiver.
    fn prune(&self, key: &ChannelKey) {
        if let Some(mut subscribers) = self.topics.get_mut(key) {
            subscribers.retain(|tx| !tx.is_disconnected());
        }
        self.topics.remove_if(key, |_, subscribers| subscribers.is_empty());
    }
}

#[async_trait(?Send)]
impl Protocol for InprocProtocol {
    fn name(&self) -> &str {
        INPROC
    }

    fn init(&self, args: &[String]) -> Result<()> {
        if !args.is_empty() {
            return Err(SwitchboardError::configuration(format!(
                "inproc takes no arguments, got {}",
                args.len()
            )));
        }
        Ok(())
    }

    async fn dial(&self, socket_type: &str, host: &str, port: u16) -> Result<ConnectionHandle> {
        let endpoint = format!("{host}:{port}");
        let handle = self.handles.next_handle();
        debug!(%handle, %endpoint, socket_type, "[INPROC] Dialed");
        self.connections.insert(handle, endpoint);
        Ok(handle)
    }

    async fn recv_from(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: Sender<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let key = (self.endpoint(handle)?, destination.address());

        if destination.is_topic() {
            let rx = self.subscribe(key.clone());
            debug!(%handle, %destination, "[INPROC] Subscribed");
            let mut source = ChannelSource { rx };
            let result = run_inbound(&mut source, &messages, &cancel).await;
            drop(source);
            self.prune(&key);
            result
        } else {
            let (_, rx) = self.queue(key);
            debug!(%handle, %destination, "[INPROC] Consuming");
            run_inbound(&mut ChannelSource { rx }, &messages, &cancel).await
        }
    }

    async fn send_to(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: Receiver<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let key = (self.endpoint(handle)?, destination.address());
        debug!(%handle, %destination, "[INPROC] Producing");

        if destination.is_topic() {
            let mut sink = TopicSink {
                topics: &self.topics,
                key,
            };
            run_outbound(&mut sink, &messages, &cancel).await
        } else {
            let (tx, _) = self.queue(key);
            run_outbound(&mut QueueSink { tx }, &messages, &cancel).await
        }
    }

    async fn close(&self, handle: ConnectionHandle) -> Result<()> {
        if let Some((_, endpoint)) = self.connections.remove(&handle) {
            self.prune_queues(&endpoint);
            debug!(%handle, %endpoint, queues = self.queues.len(), "[INPROC] Closed");
        }
        Ok(())
    }
}

struct ChannelSource {
    rx: Receiver<Bytes>,
}

#[async_trait(?Send)]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv_async().await.ok())
    }
}

struct QueueSink {
    tx: Sender<Bytes>,
}

#[async_trait(?Send)]
impl MessageSink for QueueSink {
    async fn send_message(&mut self, payload: Bytes) -> Result<()> {
        self.tx
            .send_async(payload)
            .await
            .map_err(|_| SwitchboardError::transport("inproc queue dropped"))
    }
}

struct TopicSink<'a> {
    topics: &'a DashMap<ChannelKey, Vec<Sender<Bytes>>>,
    key: ChannelKey,
}

#[async_trait(?Send)]
impl MessageSink for TopicSink<'_> {
    async fn send_message(&mut self, payload: Bytes) -> Result<()> {
        if let Some(mut subscribers) = self.topics.get_mut(&self.key) {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
            trace!(subscribers = subscribers.len(), "[INPROC] Published");
        }
        Ok(())
    }
}
