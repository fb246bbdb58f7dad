//! Transport configuration options
//!
//! Builder-style options shared by the network backends. Backends take a
//! `TransportOptions` at construction time; the default registry uses the
//! defaults.

use std::time::Duration;

/// Default cap on a single inbound frame: 64 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Options controlling dialing, handshakes and frame reads.
///
/// # Examples
///
/// ```
/// use switchboard_core::options::TransportOptions;
/// use std::time::Duration;
///
/// let opts = TransportOptions::default()
///     .with_connect_timeout(Duration::from_secs(2))
///     .with_max_frame_size(1 << 20);
/// assert_eq!(opts.max_frame_size, Some(1 << 20));
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Maximum time to wait for the TCP connection to complete.
    ///
    /// - Default: 10 seconds
    /// - `Duration::ZERO` disables the timeout (OS default applies)
    pub connect_timeout: Duration,

    /// Maximum time to complete the protocol handshake after connecting.
    ///
    /// - Default: 30 seconds
    /// - `Duration::ZERO` disables the timeout
    pub handshake_timeout: Duration,

    /// Size of each socket read, in bytes.
    ///
    /// - Default: 8192 (8KB)
    pub read_buffer_size: usize,

    /// Maximum accepted frame body, in bytes.
    ///
    /// - Default: [`DEFAULT_MAX_FRAME_SIZE`]
    /// - `Some(size)`: Larger frames fail the loop with a transport error
    /// - `None`: No limit; a peer can then make us buffer whatever it declares
    pub max_frame_size: Option<usize>,

    /// Disable Nagle's algorithm on TCP connections.
    ///
    /// - Default: `true`
    pub tcp_nodelay: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            read_buffer_size: 8192,
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            tcp_nodelay: true,
        }
    }
}

impl TransportOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the read buffer size (clamped to at least 64 bytes).
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }

    /// Limit the size of a single inbound frame.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Accept frames of any size. Only for trusted peers.
    #[must_use]
    pub const fn without_frame_limit(mut self) -> Self {
        self.max_frame_size = None;
        self
    }

    /// Enable or disable TCP_NODELAY.
    #[must_use]
    pub const fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = TransportOptions::default();
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert_eq!(opts.handshake_timeout, Duration::from_secs(30));
        assert_eq!(opts.read_buffer_size, 8192);
        assert_eq!(opts.max_frame_size, Some(DEFAULT_MAX_FRAME_SIZE));
        assert!(opts.tcp_nodelay);
    }

    #[test]
    fn test_builder() {
        let opts = TransportOptions::new()
            .with_handshake_timeout(Duration::ZERO)
            .with_read_buffer_size(1)
            .with_tcp_nodelay(false);
        assert!(opts.handshake_timeout.is_zero());
        assert_eq!(opts.read_buffer_size, 64);
        assert!(!opts.tcp_nodelay);
    }

    #[test]
    fn test_frame_limit_can_be_lifted() {
        let opts = TransportOptions::new().with_max_frame_size(16);
        assert_eq!(opts.max_frame_size, Some(16));
        assert_eq!(opts.without_frame_limit().max_frame_size, None);
    }
}
