//! # Switchboard
//!
//! A protocol-agnostic messaging facade built on `io_uring` (via `compio`).
//!
//! Pick a destination, pick a wire protocol by name, connect, then stream
//! opaque [`Bytes`] payloads in or out through `flume` channels. The same
//! code runs over any backend compiled into the build.
//!
//! ## Architecture
//!
//! - **`switchboard-core`**: the `Protocol` contract, the registry, the
//!   streaming loop runtime and the in-process backend
//! - **Protocol crates**: one backend each, registered under a name
//! - **`switchboard`**: the [`Facade`] and the startup wiring (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`inproc`** - always available, never leaves the process
//! - **`zmq`** - ZeroMQ (ZMTP 3.0, NULL mechanism) socket types
//! - **`stomp`** - STOMP 1.2 brokers (queues and topics)
//!
//! ```toml
//! [dependencies]
//! switchboard = { version = "0.1", features = ["zmq", "stomp"] }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchboard::{cancel_pair, Facade};
//!
//! # async fn example() -> switchboard::Result<()> {
//! let mut prices = Facade::topic("prices")
//!     .with_protocol("stomp")
//!     .with_credentials("guest", "guest");
//! prices.connect("broker.local", 61613).await?;
//!
//! let (tx, rx) = flume::unbounded::<switchboard::Bytes>();
//! let (cancel, signal) = cancel_pair();
//!
//! compio::runtime::spawn(async move {
//!     while let Ok(msg) = rx.recv_async().await {
//!         println!("{} bytes", msg.len());
//!     }
//!     drop(cancel);
//! })
//! .detach();
//!
//! // Runs until cancelled or the broker fails; closes the connection either way.
//! prices.recv_loop(tx, signal).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! A facade connects once. Each streaming loop closes the backend connection
//! when it returns, so a facade is single-use: build a new one to reconnect.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;
mod facade;
mod wiring;

pub use bytes::Bytes;
pub use facade::{Facade, FacadeState};
pub use switchboard_core::cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use switchboard_core::context::ConnectionContext;
pub use switchboard_core::destination::Destination;
pub use switchboard_core::error::{Result, SwitchboardError};
pub use switchboard_core::handle::ConnectionHandle;
pub use switchboard_core::options::TransportOptions;
pub use switchboard_core::protocol::{Protocol, ProtocolPtr};
pub use switchboard_core::registry::Registry;
pub use wiring::{default_registry, install_builtin, is_supported, SUPPORTED_PROTOCOLS};

/// In-process backend.
pub mod inproc {
    pub use switchboard_core::inproc::{InprocProtocol, INPROC};
}

/// ZeroMQ backend.
#[cfg(feature = "zmq")]
pub mod zmq {
    pub use switchboard_zmtp::{ZmtpProtocol, SUPPORTED_SOCKET_TYPES, ZMQ, ZMQ4};
}

/// STOMP backend.
#[cfg(feature = "stomp")]
pub mod stomp {
    pub use switchboard_stomp::{StompProtocol, STOMP};
}
