/// Switchboard Error Types
///
/// One taxonomy shared by the facade, the registry and every backend.
/// Errors travel to the caller unmodified; the facade never wraps them.
use thiserror::Error;

/// Main error type for Switchboard operations
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// Backend initialization arguments are malformed or missing
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Protocol name is unset or not compiled into this build
    #[error("unsupported protocol: {0:?}")]
    UnsupportedProtocol(String),

    /// Protocol name is known but no backend was registered under it
    #[error("unknown protocol {0:?} (backend not registered or not compiled in?)")]
    NotFound(String),

    /// Dial or handshake failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Mid-stream transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Streaming loop started on a facade that is not connected
    #[error("facade is not connected")]
    NotConnected,

    /// Connect called on a facade that already connected once
    #[error("facade is already connected")]
    AlreadyConnected,
}

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;

impl SwitchboardError {
    /// Create a configuration error with a message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connection error with a message
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transport error with a message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Reclassify a transport failure that happened while dialing.
    ///
    /// Handshakes read through the same framed I/O as streaming loops, but
    /// their failures belong to `dial`.
    #[must_use]
    pub fn into_connection(self) -> Self {
        match self {
            Self::Transport(msg) => Self::Connection(msg),
            other => other,
        }
    }

    /// Check if this error was raised while establishing a connection
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this error was raised by a running streaming loop
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
