//! The capability contract every pluggable transport implements.
//!
//! The surface is deliberately small: broker-style backends (STOMP) and
//! socket-style backends (ZMTP, inproc) both fit it without leaking their
//! concepts into the facade.
//!
//! # Obligations
//!
//! - `recv_from` / `send_to` must observe their [`CancelSignal`] and return
//!   `Ok(())` promptly once it fires. A backend that ignores it hangs the
//!   facade's loop; nothing above this trait can force it to stop.
//! - `close` must be idempotent and accept handles that were never issued or
//!   were already closed.
//! - A handle is only meaningful to the instance that issued it.
//!
//! # Notes
//!
//! This trait uses `async_trait(?Send)`: the runtime is thread-per-core
//! (`compio`), so loop futures run on the task that awaits them and need not
//! be `Send`. Implementations themselves are `Send + Sync` so a single
//! instance can live in a process-wide registry.

use crate::cancel::CancelSignal;
use crate::destination::Destination;
use crate::error::Result;
use crate::handle::ConnectionHandle;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// A pluggable messaging backend.
#[async_trait(?Send)]
pub trait Protocol: Send + Sync {
    /// Registry name of this backend (used for diagnostics).
    fn name(&self) -> &str;

    /// Configure the instance from opaque context arguments.
    ///
    /// Called by `Registry::load` on every lookup, with the facade's
    /// context in order. Fails with `Configuration` on malformed input.
    fn init(&self, args: &[String]) -> Result<()>;

    /// Establish or bind the underlying transport.
    ///
    /// Fails with `Connection` on network/handshake failure.
    async fn dial(&self, socket_type: &str, host: &str, port: u16) -> Result<ConnectionHandle>;

    /// Pump received payloads into `messages` until cancelled or failed.
    async fn recv_from(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: flume::Sender<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()>;

    /// Drain `messages`, transmitting each payload, until cancelled or failed.
    async fn send_to(
        &self,
        handle: ConnectionHandle,
        destination: &Destination,
        messages: flume::Receiver<Bytes>,
        cancel: CancelSignal,
    ) -> Result<()>;

    /// Release every resource held for `handle`.
    async fn close(&self, handle: ConnectionHandle) -> Result<()>;
}

/// Shared protocol pointer, as stored by the registry.
pub type ProtocolPtr = Arc<dyn Protocol>;
