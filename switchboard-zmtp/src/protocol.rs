//! The `zmq` backend.
//!
//! One [`ZmtpProtocol`] instance serves every facade of the process. Each
//! `dial` creates a session keyed by its handle:
//!
//! - **connect** (`host` is an address): TCP connect and handshake happen
//!   inside `dial`, so a returned handle is ready for streaming.
//! - **listen** (`host` is `*`): `dial` binds and returns immediately; a
//!   background task accepts one peer and performs the handshake. Streaming
//!   loops wait for it, racing the wait against their cancel signal.
//!
//! Both loops of a duplex session read and write through their own clone of
//! the session's `TcpStream`.

use crate::codec::{encode_frame, pong_for, subscription, ZmtpDecoder, ZmtpFrame};
use crate::handshake::perform_handshake_with_timeout;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use compio::net::{TcpListener, TcpStream};
use compio::runtime::TryClone;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::cancel::{cancel_pair, CancelHandle, CancelSignal};
use switchboard_core::destination::Destination;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::framed::FramedStream;
use switchboard_core::handle::{ConnectionHandle, HandleSequence};
use switchboard_core::options::TransportOptions;
use switchboard_core::protocol::Protocol;
use switchboard_core::socket_type::SocketType;
use switchboard_core::stream::{run_inbound, run_outbound, MessageSink, MessageSource};
use switchboard_core::tcp::{self, DialTarget};
use tracing::{debug, trace, warn};

/// Registry name of the ZMTP backend.
pub const ZMQ: &str = "zmq";

/// Alternate registry name for the same backend, kept for configurations
/// written against the `zmq4` name.
pub const ZMQ4: &str = "zmq4";

/// Socket types this backend can drive with single-peer sessions.
pub const SUPPORTED_SOCKET_TYPES: [SocketType; 6] = [
    SocketType::Pair,
    SocketType::Pub,
    SocketType::Sub,
    SocketType::Push,
    SocketType::Pull,
    SocketType::Dealer,
];

type Sessions = Arc<Mutex<HashMap<ConnectionHandle, Session>>>;

struct Session {
    socket_type: SocketType,
    link: Link,
}

enum Link {
    /// Listening; the accept task drops `ready`'s sender when it finishes.
    Pending {
        ready: flume::Receiver<()>,
        _stop: CancelHandle,
    },
    /// Handshake done. `leftover` holds bytes read past the peer's READY.
    Ready { stream: TcpStream, leftover: BytesMut },
    Failed(String),
}

/// ZeroMQ socket backend (ZMTP 3.0, NULL mechanism).
pub struct ZmtpProtocol {
    options: TransportOptions,
    identity: RwLock<Option<Bytes>>,
    handles: HandleSequence,
    sessions: Sessions,
}

impl ZmtpProtocol {
    /// Backend with default transport options.
    pub fn new() -> Self {
        Self::with_options(TransportOptions::default())
    }

    /// Backend with custom timeouts and frame limits.
    pub fn with_options(options: TransportOptions) -> Self {
        Self {
            options,
            identity: RwLock::new(None),
            handles: HandleSequence::new(),
            sessions: Arc::default(),
        }
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Take a stream clone for one loop, waiting for a listening session to
    /// get its peer. Only the reading loop receives the leftover bytes.
    async fn attach(
        &self,
        handle: ConnectionHandle,
        for_read: bool,
    ) -> Result<(SocketType, TcpStream, BytesMut)> {
        loop {
            let ready = {
                let mut sessions = self.sessions.lock();
                let session = sessions.get_mut(&handle).ok_or_else(|| {
                    SwitchboardError::transport(format!("unknown connection {handle}"))
                })?;
                match &mut session.link {
                    Link::Ready { stream, leftover } => {
                        let stream = stream.try_clone().map_err(|e| {
                            SwitchboardError::transport(format!("clone stream: {e}"))
                        })?;
                        let leftover = if for_read {
                            std::mem::take(leftover)
                        } else {
                            BytesMut::new()
                        };
                        return Ok((session.socket_type, stream, leftover));
                    }
                    Link::Failed(reason) => return Err(SwitchboardError::transport(reason.clone())),
                    Link::Pending { ready, .. } => ready.clone(),
                }
            };
            debug!(%handle, "[ZMTP] Waiting for peer");
            // Err means the accept task finished; re-check the session.
            let _ = ready.recv_async().await;
        }
    }

    fn check_socket_type(socket_type: &str) -> Result<SocketType> {
        let parsed: SocketType = socket_type.parse()?;
        if !SUPPORTED_SOCKET_TYPES.contains(&parsed) {
            return Err(SwitchboardError::configuration(format!(
                "socket type {parsed} is not supported by the zmq backend"
            )));
        }
        Ok(parsed)
    }

    fn spawn_accept(
        &self,
        handle: ConnectionHandle,
        listener: TcpListener,
        socket_type: SocketType,
        identity: Option<Bytes>,
    ) -> Link {
        let (ready_tx, ready) = flume::bounded::<()>(1);
        let (stop, stop_signal) = cancel_pair();
        let sessions = Arc::clone(&self.sessions);
        let options = self.options.clone();

        compio::runtime::spawn(async move {
            // Dropped last, after the session was updated.
            let _ready = ready_tx;
            let accepted = stop_signal
                .run_until(accept_peer(&listener, socket_type, identity, &options))
                .await;
            let Some(outcome) = accepted else {
                debug!(%handle, "[ZMTP] Accept stopped by close");
                return;
            };

            let mut sessions = sessions.lock();
            let Some(session) = sessions.get_mut(&handle) else {
                return;
            };
            session.link = match outcome {
                Ok((stream, leftover)) => {
                    debug!(%handle, "[ZMTP] Peer attached");
                    Link::Ready { stream, leftover }
                }
                Err(e) => {
                    warn!(%handle, "[ZMTP] Accept failed: {}", e);
                    Link::Failed(e.to_string())
                }
            };
        })
        .detach();

        Link::Pending { ready, _stop: stop }
    }
}

impl Default for ZmtpProtocol {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_peer(
    listener: &TcpListener,
    socket_type: SocketType,
    identity: Option<Bytes>,
    options: &TransportOptions,
) -> Result<(TcpStream, BytesMut)> {
    let stream = tcp::accept(listener, options).await?;
    let mut framed = FramedStream::new(stream, ZmtpDecoder::new(options.max_frame_size), options);
    perform_handshake_with_timeout(
        &mut framed,
        socket_type,
        identity.as_deref(),
        true,
        options.handshake_timeout,
    )
    .await
    .map_err(|e| SwitchboardError::transport(e.to_string()))?;
    Ok(framed.into_parts())
}

#[async_trait(?Send)]
impl Protocol for ZmtpProtocol {
    fn name(&self) -> &str {
        ZMQ
    }

    /// No arguments, or one: the identity sent in our READY command.
    fn init(&self, args: &[String]) -> Result<()> {
        let identity = match args {
            [] => None,
            [id] if !id.is_empty() && id.len() <= 255 => Some(Bytes::copy_from_slice(id.as_bytes())),
            [_] => {
                return Err(SwitchboardError::configuration(
                    "zmq identity must be 1 to 255 bytes",
                ))
            }
            _ => {
                return Err(SwitchboardError::configuration(format!(
                    "zmq takes at most one argument (identity), got {}",
                    args.len()
                )))
            }
        };
        *self.identity.write() = identity;
        Ok(())
    }

    /// Captures the identity set by the preceding `init` before the first
    /// await; later `init` calls do not affect this connection.
    async fn dial(&self, socket_type: &str, host: &str, port: u16) -> Result<ConnectionHandle> {
        let identity = self.identity.read().clone();
        let socket_type = Self::check_socket_type(socket_type)?;
        let target = DialTarget::parse(host, port);
        let handle = self.handles.next_handle();

        let link = match &target {
            DialTarget::Connect { host, port } => {
                let stream = tcp::connect(host, *port, &self.options).await?;
                let mut framed = FramedStream::new(
                    stream,
                    ZmtpDecoder::new(self.options.max_frame_size),
                    &self.options,
                );
                perform_handshake_with_timeout(
                    &mut framed,
                    socket_type,
                    identity.as_deref(),
                    false,
                    self.options.handshake_timeout,
                )
                .await?;
                let (stream, leftover) = framed.into_parts();
                Link::Ready { stream, leftover }
            }
            DialTarget::Listen { port } => {
                let listener = tcp::listen(*port).await?;
                self.spawn_accept(handle, listener, socket_type, identity)
            }
        };

        self.sessions.lock().insert(handle, Session { socket_type, link });
        debug!(%handle, %target, %socket_type, "[ZMTP] Dialed");
        Ok(handle)
    }

    async fn recv_from(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: flume::Sender<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let Some(attached) = cancel.run_until(self.attach(handle, true)).await else {
            return Ok(());
        };
        let (socket_type, stream, leftover) = attached?;
        if !socket_type.can_recv() {
            return Err(SwitchboardError::configuration(format!(
                "{socket_type} sockets cannot receive"
            )));
        }

        let mut framed = FramedStream::with_buffer(
            stream,
            ZmtpDecoder::new(self.options.max_frame_size),
            leftover,
            &self.options,
        );

        let filter = if socket_type == SocketType::Sub {
            let prefix = Bytes::from(destination.address());
            framed.write_all(subscription(&prefix)).await?;
            debug!(%handle, prefix = ?prefix, "[ZMTP] Subscribed");
            Some(prefix)
        } else {
            None
        };

        debug!(%handle, %destination, "[ZMTP] Receive loop started");
        let mut source = ZmtpSource {
            framed,
            filter,
            parts: Vec::new(),
        };
        run_inbound(&mut source, &messages, &cancel).await
    }

    async fn send_to(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: flume::Receiver<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let Some(attached) = cancel.run_until(self.attach(handle, false)).await else {
            return Ok(());
        };
        let (socket_type, stream, _) = attached?;
        if !socket_type.can_send() {
            return Err(SwitchboardError::configuration(format!(
                "{socket_type} sockets cannot send"
            )));
        }

        debug!(%handle, %destination, "[ZMTP] Send loop started");
        let mut sink = ZmtpSink {
            framed: FramedStream::new(
                stream,
                ZmtpDecoder::new(self.options.max_frame_size),
                &self.options,
            ),
        };
        run_outbound(&mut sink, &messages, &cancel).await
    }

    async fn close(&self, handle: ConnectionHandle) -> Result<()> {
        // Dropping the session stops a pending accept and releases our stream
        // clone; loops still running keep their own until they return.
        if self.sessions.lock().remove(&handle).is_some() {
            debug!(%handle, "[ZMTP] Closed");
        }
        Ok(())
    }
}

/// Reassembles multipart messages into single payloads.
struct ZmtpSource {
    framed: FramedStream<TcpStream, ZmtpDecoder>,
    filter: Option<Bytes>,
    parts: Vec<Bytes>,
}

impl ZmtpSource {
    async fn handle_command(&mut self, frame: &ZmtpFrame) -> Result<()> {
        match frame.command_name() {
            Some(b"PING") => {
                trace!("[ZMTP] PING, replying PONG");
                self.framed.write_all(pong_for(&frame.payload)).await
            }
            name => {
                trace!(command = ?name.map(String::from_utf8_lossy), "[ZMTP] Ignoring command");
                Ok(())
            }
        }
    }

    fn accepts(&self, parts: &[Bytes]) -> bool {
        match (&self.filter, parts.first()) {
            (Some(prefix), Some(first)) => first.starts_with(prefix),
            (Some(prefix), None) => prefix.is_empty(),
            (None, _) => true,
        }
    }
}

#[async_trait(?Send)]
impl MessageSource for ZmtpSource {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(frame) = self.framed.read_frame().await? else {
                return Ok(None);
            };
            if frame.is_command() {
                self.handle_command(&frame).await?;
                continue;
            }

            let more = frame.more();
            self.parts.push(frame.payload);
            if more {
                continue;
            }

            let parts = std::mem::take(&mut self.parts);
            if !self.accepts(&parts) {
                trace!("[ZMTP] Filtered message");
                continue;
            }
            return Ok(Some(match parts.len() {
                1 => parts.into_iter().next().unwrap_or_default(),
                _ => Bytes::from(parts.concat()),
            }));
        }
    }
}

struct ZmtpSink {
    framed: FramedStream<TcpStream, ZmtpDecoder>,
}

#[async_trait(?Send)]
impl MessageSink for ZmtpSink {
    async fn send_message(&mut self, payload: Bytes) -> Result<()> {
        self.framed.write_all(encode_frame(0, &payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_arguments() {
        let zmq = ZmtpProtocol::new();
        assert!(zmq.init(&[]).is_ok());
        assert!(zmq.init(&["worker-1".into()]).is_ok());
        assert_eq!(zmq.identity.read().as_deref(), Some(&b"worker-1"[..]));

        assert!(zmq.init(&[String::new()]).is_err());
        assert!(zmq.init(&["a".into(), "b".into()]).is_err());
    }

    #[test]
    fn test_socket_type_validation() {
        assert_eq!(ZmtpProtocol::check_socket_type("push").unwrap(), SocketType::Push);
        for bad in ["ROUTER", "REQ", "queue", ""] {
            let err = ZmtpProtocol::check_socket_type(bad).unwrap_err();
            assert!(matches!(err, SwitchboardError::Configuration(_)), "{bad}");
        }
    }

    #[compio::test]
    async fn test_dial_refused_is_connection_error() {
        let port = portpicker::pick_unused_port().expect("free port");
        let zmq = ZmtpProtocol::new();
        let err = zmq.dial("PUSH", "127.0.0.1", port).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(zmq.session_count(), 0);
    }

    #[compio::test]
    async fn test_listen_then_close_before_peer() {
        let port = portpicker::pick_unused_port().expect("free port");
        let zmq = ZmtpProtocol::new();
        let handle = zmq.dial("PULL", "*", port).await.unwrap();
        assert_eq!(zmq.session_count(), 1);

        zmq.close(handle).await.unwrap();
        zmq.close(handle).await.unwrap();
        assert_eq!(zmq.session_count(), 0);
    }

    #[compio::test]
    async fn test_cancel_while_waiting_for_peer() {
        let port = portpicker::pick_unused_port().expect("free port");
        let zmq = ZmtpProtocol::new();
        let handle = zmq.dial("PULL", "*", port).await.unwrap();

        let (tx, _rx) = flume::unbounded();
        let (cancel, signal) = cancel_pair();
        let pull = Destination::Socket("PULL".into());
        let (result, ()) = futures::join!(
            zmq.recv_from(handle, &pull, tx, signal),
            async move {
                compio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            }
        );
        assert!(result.is_ok());
        zmq.close(handle).await.unwrap();
    }
}
