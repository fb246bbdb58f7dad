//! The messaging facade.
//!
//! A [`Facade`] names *where* messages go (a [`Destination`]) and *which*
//! backend carries them (a protocol name). It owns no I/O of its own: after
//! `connect` it holds the backend instance and the handle that backend issued,
//! and the streaming loops delegate to them.
//!
//! ```text
//! Configured --connect ok--> Connected --loop returns--> Closed
//!     ^   |
//!     +---+ connect failed
//! ```

use crate::wiring::{default_registry, is_supported};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use switchboard_core::cancel::CancelSignal;
use switchboard_core::context::ConnectionContext;
use switchboard_core::destination::Destination;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::handle::ConnectionHandle;
use switchboard_core::protocol::ProtocolPtr;
use switchboard_core::registry::Registry;
use tracing::{debug, warn};

use bytes::Bytes;

/// Lifecycle of a facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    /// Built, not connected yet (or the last connect failed)
    Configured,
    /// A backend connection is live
    Connected,
    /// A streaming loop returned and the connection was closed
    Closed,
}

enum State {
    Configured,
    Connected {
        protocol: ProtocolPtr,
        handle: ConnectionHandle,
    },
    Closed {
        handle: ConnectionHandle,
    },
}

impl State {
    fn kind(&self) -> FacadeState {
        match self {
            Self::Configured => FacadeState::Configured,
            Self::Connected { .. } => FacadeState::Connected,
            Self::Closed { .. } => FacadeState::Closed,
        }
    }
}

/// A protocol-agnostic message stream endpoint.
///
/// # Example
///
/// ```rust,no_run
/// use switchboard::{cancel_pair, Bytes, Facade};
///
/// # async fn example() -> switchboard::Result<()> {
/// let mut jobs = Facade::queue("jobs").with_protocol("inproc");
/// jobs.connect("local", 0).await?;
///
/// let (tx, rx) = flume::unbounded();
/// tx.send(Bytes::from_static(b"hello")).ok();
/// drop(tx);
///
/// let (_cancel, signal) = cancel_pair();
/// jobs.send_loop(rx, signal).await?;
/// # Ok(())
/// # }
/// ```
pub struct Facade {
    destination: Destination,
    message_type: String,
    protocol: Option<String>,
    context: ConnectionContext,
    registry: Option<Arc<Registry>>,
    state: Mutex<State>,
}

impl Facade {
    fn new(destination: Destination, message_type: String) -> Self {
        Self {
            destination,
            message_type,
            protocol: None,
            context: ConnectionContext::new(),
            registry: None,
            state: Mutex::new(State::Configured),
        }
    }

    /// A facade for the queue `name`.
    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(Destination::Queue(name.into()), String::new())
    }

    /// A facade for the topic `name` (addressed as `/topic/<name>`).
    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(Destination::Topic(name.into()), String::new())
    }

    /// A raw socket facade of type `socket_type` (e.g. `"PUSH"`).
    pub fn socket(socket_type: impl Into<String>) -> Self {
        let socket_type = socket_type.into();
        Self::new(Destination::Socket(socket_type.clone()), socket_type)
    }

    /// Returns true (and logs) if a setter arrives too late to matter.
    fn frozen(&self, setter: &'static str) -> bool {
        let state = self.state.lock().kind();
        if state == FacadeState::Configured {
            return false;
        }
        warn!(
            setter,
            destination = %self.destination,
            ?state,
            "[FACADE] Setter called after connect, ignoring"
        );
        true
    }

    /// Select the backend by registry name.
    #[must_use]
    pub fn with_protocol(mut self, name: impl Into<String>) -> Self {
        if !self.frozen("with_protocol") {
            self.protocol = Some(name.into());
        }
        self
    }

    /// Append `user` then `pass` to the connection context.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        if !self.frozen("with_credentials") {
            self.context.push(user);
            self.context.push(pass);
        }
        self
    }

    /// Append one opaque value to the connection context.
    #[must_use]
    pub fn with_context_arg(mut self, arg: impl Into<String>) -> Self {
        if !self.frozen("with_context_arg") {
            self.context.push(arg);
        }
        self
    }

    /// Override the socket type string handed to `dial`.
    ///
    /// Queue and topic facades dial with an empty type by default; socket
    /// backends need one (`Facade::queue("q").with_message_type("PUSH")`).
    #[must_use]
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        if !self.frozen("with_message_type") {
            self.message_type = message_type.into();
        }
        self
    }

    /// Resolve protocols from `registry` instead of the process default.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        if !self.frozen("with_registry") {
            self.registry = Some(registry);
        }
        self
    }

    /// Load the selected backend and dial `host:port`.
    ///
    /// For socket backends a host of `"*"` listens instead of connecting.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` unless the facade is Configured
    /// - `UnsupportedProtocol` if no protocol was selected or the name is not
    ///   compiled into this build
    /// - `NotFound`, or the backend's `init` error, from the registry
    /// - the backend's `dial` error
    ///
    /// On error the facade stays Configured and may be connected again.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.state.get_mut().kind() != FacadeState::Configured {
            return Err(SwitchboardError::AlreadyConnected);
        }

        let name = match self.protocol.as_deref() {
            Some(name) if is_supported(name) => name,
            Some(name) => return Err(SwitchboardError::UnsupportedProtocol(name.to_string())),
            None => return Err(SwitchboardError::UnsupportedProtocol(String::new())),
        };

        let registry = self.registry.clone().unwrap_or_else(default_registry);
        let protocol = registry.load(name, self.context.as_slice())?;
        let handle = protocol.dial(&self.message_type, host, port).await?;

        debug!(
            protocol = name,
            destination = %self.destination,
            host,
            port,
            %handle,
            "[FACADE] Connected"
        );
        *self.state.get_mut() = State::Connected { protocol, handle };
        Ok(())
    }

    /// Same as [`connect`](Self::connect); reads better with `"*"` hosts.
    pub async fn bind(&mut self, host: &str, port: u16) -> Result<()> {
        self.connect(host, port).await
    }

    fn connected(&self) -> Result<(ProtocolPtr, ConnectionHandle)> {
        match &*self.state.lock() {
            State::Connected { protocol, handle } => Ok((Arc::clone(protocol), *handle)),
            _ => Err(SwitchboardError::NotConnected),
        }
    }

    /// Close `handle` once and fold the outcome into the loop result.
    async fn finish(
        &self,
        protocol: &ProtocolPtr,
        handle: ConnectionHandle,
        result: Result<()>,
        direction: &'static str,
    ) -> Result<()> {
        let closed = protocol.close(handle).await;
        *self.state.lock() = State::Closed { handle };

        if let (Err(loop_err), Err(close_err)) = (&result, &closed) {
            warn!(
                direction,
                %handle,
                error = %close_err,
                loop_error = %loop_err,
                "[FACADE] Close failed after loop error"
            );
        }
        debug!(
            direction,
            protocol = protocol.name(),
            %handle,
            ok = result.is_ok(),
            "[FACADE] Loop finished, connection closed"
        );
        result.and(closed)
    }

    /// Deliver received payloads into `messages` until cancelled or failed.
    ///
    /// The backend connection is closed when this returns, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless Connected (nothing is closed in that case);
    /// otherwise the backend's receive error, or its close error after a
    /// clean receive.
    pub async fn recv_loop(&self, messages: flume::Sender<Bytes>, cancel: CancelSignal) -> Result<()> {
        let (protocol, handle) = self.connected()?;
        debug!(destination = %self.destination, %handle, "[FACADE] Receive loop started");
        let result = protocol
            .recv_from(handle, &self.destination, messages, cancel)
            .await;
        self.finish(&protocol, handle, result, "recv").await
    }

    /// Transmit payloads taken from `messages` until cancelled, drained or
    /// failed.
    ///
    /// The backend connection is closed when this returns, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// As [`recv_loop`](Self::recv_loop).
    pub async fn send_loop(&self, messages: flume::Receiver<Bytes>, cancel: CancelSignal) -> Result<()> {
        let (protocol, handle) = self.connected()?;
        debug!(destination = %self.destination, %handle, "[FACADE] Send loop started");
        let result = protocol
            .send_to(handle, &self.destination, messages, cancel)
            .await;
        self.finish(&protocol, handle, result, "send").await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FacadeState {
        self.state.lock().kind()
    }

    /// Destination fixed at construction.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Selected protocol name, if any.
    pub fn protocol_name(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The handle of the current or last connection.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match &*self.state.lock() {
            State::Configured => None,
            State::Connected { handle, .. } | State::Closed { handle } => Some(*handle),
        }
    }

    /// Arguments handed to the backend's `init` on connect.
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("destination", &self.destination)
            .field("message_type", &self.message_type)
            .field("protocol", &self.protocol)
            .field("context_len", &self.context.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
