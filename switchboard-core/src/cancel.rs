//! Cooperative cancellation for streaming loops.
//!
//! A loop is handed a [`CancelSignal`] and races every blocking step against
//! it. The caller keeps the matching [`CancelHandle`] and fires it once.
//!
//! Cancellation is observed when either:
//! - the handle is fired (or dropped), which wakes every clone of the signal
//! - a value arrives on an adapted caller channel ([`CancelSignal::from_receiver`])
//!
//! ```rust
//! use switchboard_core::cancel::cancel_pair;
//!
//! let (handle, signal) = cancel_pair();
//! assert!(!signal.is_cancelled());
//! handle.cancel();
//! assert!(signal.is_cancelled());
//! ```

use futures::{pin_mut, select_biased, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller side of a cancellation pair.
///
/// Not `Clone`: the signal fires when this value goes away, so there is
/// exactly one owner.
#[derive(Debug)]
pub struct CancelHandle {
    tx: flume::Sender<()>,
}

impl CancelHandle {
    /// Fire the signal. Every clone of the paired [`CancelSignal`] observes it.
    pub fn cancel(self) {
        drop(self.tx);
    }
}

/// Loop side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: flume::Receiver<()>,
    fired: Arc<AtomicBool>,
}

/// Create a connected cancellation pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = flume::bounded(1);
    (CancelHandle { tx }, CancelSignal::from_receiver(rx))
}

impl CancelSignal {
    /// Adapt a caller-owned channel.
    ///
    /// Any value received, or all senders being dropped, counts as
    /// cancellation. A value wakes one waiter only; prefer [`cancel_pair`]
    /// when both halves of a duplex share the signal.
    pub fn from_receiver(rx: flume::Receiver<()>) -> Self {
        Self {
            rx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire) || self.rx.is_disconnected() || !self.rx.is_empty()
    }

    /// Resolves once cancellation is signalled.
    pub async fn cancelled(&self) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        // Ok(()) is an explicit signal, Err(_) means every sender is gone.
        let _ = self.rx.recv_async().await;
        self.fired.store(true, Ordering::Release);
    }

    /// Drive `fut` until it completes or cancellation wins.
    ///
    /// Returns `None` if cancelled. When both are ready, cancellation wins.
    /// `fut` is dropped on cancellation, so callers must treat any partially
    /// performed I/O as lost.
    pub async fn run_until<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }

        let fut = fut.fuse();
        let cancelled = self.cancelled().fuse();
        pin_mut!(fut, cancelled);

        select_biased! {
            () = cancelled => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_drop_handle_cancels() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_caller_channel_value_cancels() {
        let (tx, rx) = flume::unbounded();
        let signal = CancelSignal::from_receiver(rx);
        assert!(!signal.is_cancelled());
        tx.send(()).unwrap();
        assert!(signal.is_cancelled());
    }

    #[compio::test]
    async fn test_run_until_completes() {
        let (_handle, signal) = cancel_pair();
        let out = signal.run_until(async { 7 }).await;
        assert_eq!(out, Some(7));
    }

    #[compio::test]
    async fn test_run_until_cancelled_while_pending() {
        let (handle, signal) = cancel_pair();
        let waiter = signal.clone();

        let (out, ()) = futures::join!(
            waiter.run_until(futures::future::pending::<()>()),
            async move {
                compio::time::sleep(Duration::from_millis(20)).await;
                handle.cancel();
            }
        );

        assert_eq!(out, None);
        assert!(signal.is_cancelled());
    }

    #[compio::test]
    async fn test_cancel_wakes_every_clone() {
        let (handle, signal) = cancel_pair();
        let a = signal.clone();
        let b = signal.clone();
        handle.cancel();

        a.cancelled().await;
        b.cancelled().await;
        assert_eq!(signal.run_until(async { 1 }).await, None);
    }
}
