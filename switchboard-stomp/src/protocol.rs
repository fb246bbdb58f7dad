//! The `stomp` backend.
//!
//! Brokers (ActiveMQ, RabbitMQ, Artemis) only accept inbound connections, so
//! `dial` always connects. The session handshake (`CONNECT` → `CONNECTED`)
//! completes inside `dial`; the streaming loops then share the connection:
//! - `recv_from`: `SUBSCRIBE` (ack auto), one payload per `MESSAGE` body
//! - `send_to`: one `SEND` with `content-length` per payload
//! - `close`: best-effort `DISCONNECT`, then the session is dropped

use crate::frame::{StompDecoder, StompFrame};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use compio::net::TcpStream;
use compio::runtime::TryClone;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use switchboard_core::cancel::CancelSignal;
use switchboard_core::destination::Destination;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::framed::FramedStream;
use switchboard_core::handle::{ConnectionHandle, HandleSequence};
use switchboard_core::options::TransportOptions;
use switchboard_core::protocol::Protocol;
use switchboard_core::stream::{run_inbound, run_outbound, MessageSink, MessageSource};
use switchboard_core::tcp::{self, DialTarget};
use tracing::{debug, trace, warn};

/// Registry name of the STOMP backend.
pub const STOMP: &str = "stomp";

/// Protocol version we negotiate.
pub const STOMP_VERSION: &str = "1.2";

type Framed = FramedStream<TcpStream, StompDecoder>;

/// Login and passcode sent in `CONNECT`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// `login` header value; never empty.
    pub login: String,
    /// `passcode` header value.
    pub passcode: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("passcode", &"***")
            .finish()
    }
}

struct Session {
    stream: TcpStream,
    leftover: BytesMut,
    subscriptions: AtomicU64,
}

/// STOMP 1.2 broker backend.
pub struct StompProtocol {
    options: TransportOptions,
    credentials: RwLock<Option<Credentials>>,
    handles: HandleSequence,
    sessions: Mutex<HashMap<ConnectionHandle, Session>>,
}

impl StompProtocol {
    /// Backend with default transport options.
    pub fn new() -> Self {
        Self::with_options(TransportOptions::default())
    }

    /// Backend with custom timeouts and frame limits.
    pub fn with_options(options: TransportOptions) -> Self {
        Self {
            options,
            credentials: RwLock::new(None),
            handles: HandleSequence::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Credentials configured by the last `init`.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Clone the session stream; the reading loop also takes the leftover.
    fn attach(&self, handle: ConnectionHandle, for_read: bool) -> Result<(Framed, u64)> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&handle)
            .ok_or_else(|| SwitchboardError::transport(format!("unknown connection {handle}")))?;
        let stream = session
            .stream
            .try_clone()
            .map_err(|e| SwitchboardError::transport(format!("clone stream: {e}")))?;
        let leftover = if for_read {
            std::mem::take(&mut session.leftover)
        } else {
            BytesMut::new()
        };
        let id = session.subscriptions.fetch_add(1, Ordering::Relaxed);
        Ok((
            FramedStream::with_buffer(stream, StompDecoder, leftover, &self.options),
            id,
        ))
    }

    async fn handshake(
        framed: &mut Framed,
        host: &str,
        credentials: Option<Credentials>,
    ) -> Result<StompFrame> {
        let mut connect = StompFrame::new("CONNECT")
            .header("accept-version", STOMP_VERSION)
            .header("host", host);
        if let Some(creds) = credentials {
            connect = connect
                .header("login", creds.login)
                .header("passcode", creds.passcode);
        }
        connect = connect.header("heart-beat", "0,0");
        framed.write_all(connect.encode()).await?;

        let reply = framed
            .read_frame()
            .await?
            .ok_or_else(|| SwitchboardError::connection("broker closed the connection"))?;
        match reply.command.as_str() {
            "CONNECTED" => Ok(reply),
            "ERROR" => Err(SwitchboardError::connection(format!(
                "broker refused connection: {}",
                error_message(&reply)
            ))),
            other => Err(SwitchboardError::connection(format!(
                "expected CONNECTED, got {other}"
            ))),
        }
    }
}

impl Default for StompProtocol {
    fn default() -> Self {
        Self::new()
    }
}

fn error_message(frame: &StompFrame) -> String {
    match frame.get("message") {
        Some(message) if frame.body.is_empty() => message.to_string(),
        Some(message) => format!("{message}: {}", String::from_utf8_lossy(&frame.body)),
        None => String::from_utf8_lossy(&frame.body).into_owned(),
    }
}

#[async_trait(?Send)]
impl Protocol for StompProtocol {
    fn name(&self) -> &str {
        STOMP
    }

    /// No arguments (anonymous) or exactly `[login, passcode]`.
    fn init(&self, args: &[String]) -> Result<()> {
        let credentials = match args {
            [] => None,
            [login, _] if login.is_empty() => {
                return Err(SwitchboardError::configuration("stomp login must not be empty"))
            }
            [login, passcode] => Some(Credentials {
                login: login.clone(),
                passcode: passcode.clone(),
            }),
            _ => {
                return Err(SwitchboardError::configuration(format!(
                    "stomp takes no arguments or [login, passcode], got {}",
                    args.len()
                )))
            }
        };
        *self.credentials.write() = credentials;
        Ok(())
    }

    /// Connects with the credentials of the `init` that preceded this call.
    ///
    /// They are captured before the first await, so a later `init` from
    /// another facade cannot change what this connection sends.
    async fn dial(&self, socket_type: &str, host: &str, port: u16) -> Result<ConnectionHandle> {
        let credentials = self.credentials();
        let DialTarget::Connect { host, port } = DialTarget::parse(host, port) else {
            return Err(SwitchboardError::configuration(
                "stomp connects to a broker and cannot listen on '*'",
            ));
        };

        let stream = tcp::connect(&host, port, &self.options).await?;
        let mut framed = FramedStream::new(stream, StompDecoder, &self.options);

        let limit = self.options.handshake_timeout;
        let handshake = if limit.is_zero() {
            Self::handshake(&mut framed, &host, credentials).await
        } else {
            compio::time::timeout(limit, Self::handshake(&mut framed, &host, credentials))
                .await
                .unwrap_or_else(|_| {
                    Err(SwitchboardError::connection(format!(
                        "no CONNECTED within {limit:?}"
                    )))
                })
        };
        let connected = handshake.map_err(SwitchboardError::into_connection)?;

        let handle = self.handles.next_handle();
        debug!(
            %handle,
            host = %host,
            port,
            socket_type,
            version = connected.get("version").unwrap_or("1.0"),
            server = connected.get("server").unwrap_or("unknown"),
            "[STOMP] Connected"
        );

        let (stream, leftover) = framed.into_parts();
        self.sessions.lock().insert(
            handle,
            Session {
                stream,
                leftover,
                subscriptions: AtomicU64::new(0),
            },
        );
        Ok(handle)
    }

    async fn recv_from(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: flume::Sender<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let (mut framed, id) = self.attach(handle, true)?;
        let subscription = format!("sub-{id}");

        let subscribe = StompFrame::new("SUBSCRIBE")
            .header("id", subscription.as_str())
            .header("destination", destination.address())
            .header("ack", "auto");
        framed.write_all(subscribe.encode()).await?;
        debug!(%handle, %destination, %subscription, "[STOMP] Subscribed");

        let mut source = StompSource {
            framed,
            subscription,
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
        let (framed, _) = self.attach(handle, false)?;
        debug!(%handle, %destination, "[STOMP] Send loop started");

        let mut sink = StompSink {
            framed,
            destination: destination.address(),
        };
        run_outbound(&mut sink, &messages, &cancel).await
    }

    async fn close(&self, handle: ConnectionHandle) -> Result<()> {
        let Some(session) = self.sessions.lock().remove(&handle) else {
            return Ok(());
        };

        let mut framed = FramedStream::new(session.stream, StompDecoder, &self.options);
        let disconnect = framed.write_all(StompFrame::new("DISCONNECT").encode());
        let limit = self.options.connect_timeout;
        let sent = if limit.is_zero() {
            disconnect.await
        } else {
            compio::time::timeout(limit, disconnect)
                .await
                .unwrap_or_else(|_| Err(SwitchboardError::transport("DISCONNECT timed out")))
        };
        if let Err(e) = sent {
            warn!(%handle, "[STOMP] DISCONNECT not delivered: {}", e);
        }
        debug!(%handle, "[STOMP] Closed");
        Ok(())
    }
}

struct StompSource {
    framed: Framed,
    subscription: String,
}

#[async_trait(?Send)]
impl MessageSource for StompSource {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(frame) = self.framed.read_frame().await? else {
                return Ok(None);
            };
            match frame.command.as_str() {
                "MESSAGE" => {
                    if frame
                        .get("subscription")
                        .is_some_and(|s| s != self.subscription)
                    {
                        trace!("[STOMP] MESSAGE for another subscription");
                        continue;
                    }
                    return Ok(Some(frame.body));
                }
                "ERROR" => {
                    return Err(SwitchboardError::transport(format!(
                        "broker error: {}",
                        error_message(&frame)
                    )))
                }
                other => trace!(command = other, "[STOMP] Ignoring frame"),
            }
        }
    }
}

struct StompSink {
    framed: Framed,
    destination: String,
}

#[async_trait(?Send)]
impl MessageSink for StompSink {
    async fn send_message(&mut self, payload: Bytes) -> Result<()> {
        let frame = StompFrame::new("SEND")
            .header("destination", self.destination.as_str())
            .header("content-type", "application/octet-stream")
            .body(payload);
        self.framed.write_all(frame.encode()).await
    }
}
