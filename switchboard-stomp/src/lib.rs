//! # Switchboard STOMP
//!
//! STOMP 1.2 broker backend, registered under the name `stomp`.
//!
//! Connection context: none for anonymous brokers, or `[login, passcode]`
//! (what `Facade::with_credentials` produces). Destinations map directly to
//! STOMP destinations: queues verbatim, topics as `/topic/<name>`.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod frame;
mod protocol;

pub use frame::{StompDecoder, StompFrame};
pub use protocol::{Credentials, StompProtocol, STOMP, STOMP_VERSION};
