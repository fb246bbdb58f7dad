//! RAII guard that marks a stream as poisoned when a critical I/O section is
//! abandoned.
//!
//! Streaming loops race transport reads against cancellation. When
//! cancellation wins, the read future is dropped mid-flight and the stream
//! may hold half a frame. The guard records that:
//!
//! 1. `PoisonGuard::new()` sets the flag (assume failure)
//! 2. If the future is dropped before completion, the flag stays set
//! 3. Only `disarm()` after the whole frame was read clears it
//!
//! Once poisoned, a stream must not be read again; the owning session is
//! closed and a new connection is dialed.
//!
//! ```rust
//! use switchboard_core::poison::PoisonGuard;
//!
//! let mut poisoned = false;
//! {
//!     let _guard = PoisonGuard::new(&mut poisoned);
//!     // dropped without disarm: simulated cancellation
//! }
//! assert!(poisoned);
//! ```

/// Marks the borrowed flag poisoned unless disarmed.
pub struct PoisonGuard<'a> {
    flag: &'a mut bool,
}

impl<'a> PoisonGuard<'a> {
    /// Arm the guard, immediately marking the stream as poisoned.
    #[inline]
    pub fn new(flag: &'a mut bool) -> Self {
        *flag = true;
        Self { flag }
    }

    /// Mark the stream healthy. Call only after the whole operation succeeded.
    #[inline]
    pub fn disarm(self) {
        *self.flag = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_on_drop() {
        let mut poisoned = false;
        {
            let _guard = PoisonGuard::new(&mut poisoned);
        }
        assert!(poisoned, "stream should be poisoned when guard is dropped");
    }

    #[test]
    fn test_disarm_clears_poison() {
        let mut poisoned = true;
        PoisonGuard::new(&mut poisoned).disarm();
        assert!(!poisoned, "stream should be healthy after disarm");
    }
}
