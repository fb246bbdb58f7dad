//! Streaming loop runtime shared by every backend.
//!
//! Backends adapt their transport to [`MessageSource`] (inbound) or
//! [`MessageSink`] (outbound) and hand it to [`run_inbound`] /
//! [`run_outbound`], which own the cancellation and channel semantics:
//!
//! | Event | `run_inbound` | `run_outbound` |
//! |---|---|---|
//! | cancellation | `Ok(())` | `Ok(())` |
//! | consumer dropped its receiver | `Ok(())` | n/a |
//! | every producer dropped | n/a | `Ok(())` |
//! | source ended (peer closed) | `Transport` error | n/a |
//! | transport error | returned as-is | returned as-is |
//!
//! Payloads flow in transport order; nothing is batched or reordered.

use crate::cancel::CancelSignal;
use crate::error::{Result, SwitchboardError};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

/// Transport side of an inbound stream.
#[async_trait(?Send)]
pub trait MessageSource {
    /// Next complete payload, or `None` once the peer closed the stream.
    async fn next_message(&mut self) -> Result<Option<Bytes>>;
}

/// Transport side of an outbound stream.
#[async_trait(?Send)]
pub trait MessageSink {
    /// Transmit one payload.
    async fn send_message(&mut self, payload: Bytes) -> Result<()>;
}

/// Pump payloads from `source` into `messages` until cancelled or failed.
pub async fn run_inbound<S>(
    source: &mut S,
    messages: &flume::Sender<Bytes>,
    cancel: &CancelSignal,
) -> Result<()>
where
    S: MessageSource + ?Sized,
{
    let mut delivered = 0u64;
    loop {
        let next = match cancel.run_until(source.next_message()).await {
            None => {
                debug!(delivered, "[STREAM] Inbound loop cancelled");
                return Ok(());
            }
            Some(next) => next?,
        };

        let Some(payload) = next else {
            debug!(delivered, "[STREAM] Inbound source closed by peer");
            return Err(SwitchboardError::transport("connection closed by peer"));
        };

        trace!(len = payload.len(), "[STREAM] Delivering payload");
        match cancel.run_until(messages.send_async(payload)).await {
            None => {
                debug!(delivered, "[STREAM] Inbound loop cancelled");
                return Ok(());
            }
            Some(Err(_)) => {
                debug!(delivered, "[STREAM] Consumer dropped, stopping inbound loop");
                return Ok(());
            }
            Some(Ok(())) => delivered += 1,
        }
    }
}

/// Drain `messages` into `sink` until cancelled, drained or failed.
///
/// A payload already handed to the sink is always written to completion;
/// cancellation is only observed between payloads.
pub async fn run_outbound<S>(
    sink: &mut S,
    messages: &flume::Receiver<Bytes>,
    cancel: &CancelSignal,
) -> Result<()>
where
    S: MessageSink + ?Sized,
{
    let mut sent = 0u64;
    loop {
        let payload = match cancel.run_until(messages.recv_async()).await {
            None => {
                debug!(sent, "[STREAM] Outbound loop cancelled");
                return Ok(());
            }
            Some(Err(_)) => {
                debug!(sent, "[STREAM] Producers dropped, stopping outbound loop");
                return Ok(());
            }
            Some(Ok(payload)) => payload,
        };

        trace!(len = payload.len(), "[STREAM] Transmitting payload");
        sink.send_message(payload).await?;
        sent += 1;
    }
}
