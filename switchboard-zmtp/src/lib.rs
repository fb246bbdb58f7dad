//! # Switchboard ZMTP
//!
//! ZeroMQ socket backend, registered under the name `zmq`.
//!
//! Speaks ZMTP 3.0 with the NULL security mechanism, so it interoperates
//! with libzmq 4.1+ peers for the single-peer socket patterns:
//! - **PUSH / PULL**: pipelines
//! - **PUB / SUB**: topic prefix subscriptions (`0x01` + prefix messages)
//! - **PAIR** and **DEALER**: bidirectional
//!
//! ## Addressing
//!
//! `dial(socket_type, host, port)`: `host == "*"` binds `0.0.0.0:port` and
//! accepts one peer; any other host connects to `tcp://host:port`.
//!
//! ## Messages
//!
//! Every payload handed to `send_to` goes out as a single-frame message.
//! Inbound multipart messages are concatenated into one payload.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod codec;
pub mod greeting;
pub mod handshake;
mod protocol;

pub use protocol::{ZmtpProtocol, SUPPORTED_SOCKET_TYPES, ZMQ, ZMQ4};
