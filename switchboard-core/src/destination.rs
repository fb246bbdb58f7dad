//! Logical message destinations.
//!
//! A destination is fixed when the facade is built and is only interpreted by
//! the backend at connect/stream time.

use std::fmt;

/// Reserved prefix that marks a topic address.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Logical address a message stream targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Named queue, addressed verbatim
    Queue(String),
    /// Named topic, addressed as `/topic/<name>`
    Topic(String),
    /// Raw socket of the given type; carries no address
    Socket(String),
}

impl Destination {
    /// The address string handed to the backend.
    ///
    /// ```
    /// use switchboard_core::destination::Destination;
    ///
    /// assert_eq!(Destination::Queue("jobs".into()).address(), "jobs");
    /// assert_eq!(Destination::Topic("news".into()).address(), "/topic/news");
    /// assert_eq!(Destination::Socket("PUSH".into()).address(), "");
    /// ```
    pub fn address(&self) -> String {
        match self {
            Self::Queue(name) => name.clone(),
            Self::Topic(name) => format!("{TOPIC_PREFIX}{name}"),
            Self::Socket(_) => String::new(),
        }
    }

    /// Socket type string for socket destinations.
    pub fn socket_type(&self) -> Option<&str> {
        match self {
            Self::Socket(typ) => Some(typ),
            _ => None,
        }
    }

    /// Returns true for topic destinations.
    pub fn is_topic(&self) -> bool {
        matches!(self, Self::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "queue:{name}"),
            Self::Topic(name) => write!(f, "topic:{name}"),
            Self::Socket(typ) => write!(f, "socket:{typ}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_prefix() {
        let dest = Destination::Topic("prices".into());
        assert!(dest.is_topic());
        assert!(dest.address().starts_with(TOPIC_PREFIX));
        assert_eq!(dest.socket_type(), None);
    }

    #[test]
    fn test_socket_destination() {
        let dest = Destination::Socket("SUB".into());
        assert_eq!(dest.socket_type(), Some("SUB"));
        assert!(dest.address().is_empty());
        assert_eq!(dest.to_string(), "socket:SUB");
    }
}
