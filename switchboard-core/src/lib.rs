//! Switchboard Core
//!
//! This crate contains the protocol-agnostic building blocks:
//! - The capability contract every backend implements (`protocol`)
//! - The name → backend registry (`registry`)
//! - Destinations, connection context and handles (`destination`, `context`, `handle`)
//! - Cooperative cancellation and the streaming loop pumps (`cancel`, `stream`)
//! - Buffered frame I/O shared by the network backends (`framed`, `tcp`)
//! - Transport options (`options`)
//! - The in-process backend (`inproc`)
//! - Error types (`error`)

// The tcp module needs raw fd/socket access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

pub mod cancel;
pub mod context;
pub mod destination;
pub mod error;
pub mod framed;
pub mod handle;
pub mod inproc;
pub mod options;
pub mod poison;
pub mod protocol;
pub mod registry;
pub mod socket_type;
pub mod stream;
pub mod tcp;

// Keep the prelude small; backends import what they implement against.
pub mod prelude {
    pub use crate::cancel::{cancel_pair, CancelHandle, CancelSignal};
    pub use crate::context::ConnectionContext;
    pub use crate::destination::Destination;
    pub use crate::error::{Result, SwitchboardError};
    pub use crate::handle::{ConnectionHandle, HandleSequence};
    pub use crate::options::TransportOptions;
    pub use crate::protocol::{Protocol, ProtocolPtr};
    pub use crate::registry::Registry;
    pub use crate::socket_type::SocketType;
    pub use crate::stream::{run_inbound, run_outbound, MessageSink, MessageSource};
}
