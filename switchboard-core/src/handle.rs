//! Connection handles issued by backends.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier for one live backend connection.
///
/// Issued by `Protocol::dial` and handed back on every later call. The
/// backend owns whatever the handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a raw id.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    #[inline]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic handle allocator; one per backend instance.
#[derive(Debug)]
pub struct HandleSequence {
    next: AtomicU64,
}

impl HandleSequence {
    /// Start a sequence at 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next handle.
    pub fn next_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_unique() {
        let seq = HandleSequence::new();
        let a = seq.next_handle();
        let b = seq.next_handle();
        assert_ne!(a, b);
        assert_eq!(a.id(), 1);
        assert_eq!(b.to_string(), "#2");
    }
}
