//! Startup wiring: which backends this build knows about.
//!
//! Backends are linked in through cargo features and registered once, the
//! first time the process-wide registry is used.

use once_cell::sync::Lazy;
use std::sync::Arc;
use switchboard_core::inproc::{InprocProtocol, INPROC};
use switchboard_core::registry::Registry;
use tracing::debug;

/// Protocol names a facade accepts in this build.
///
/// `inproc` is always present; `zmq` and `stomp` follow the cargo features of
/// the same name. `zmq4` is an alias for `zmq`. Names outside this set fail `connect` with
/// `UnsupportedProtocol` before the registry is consulted.
pub const SUPPORTED_PROTOCOLS: &[&str] = &[
    INPROC,
    #[cfg(feature = "zmq")]
    switchboard_zmtp::ZMQ,
    #[cfg(feature = "zmq")]
    switchboard_zmtp::ZMQ4,
    #[cfg(feature = "stomp")]
    switchboard_stomp::STOMP,
];

/// Returns true if `name` is compiled into this build.
pub fn is_supported(name: &str) -> bool {
    SUPPORTED_PROTOCOLS.contains(&name)
}

/// Register every compiled-in backend with default options.
///
/// # Panics
///
/// Panics if `registry` already holds one of the names.
pub fn install_builtin(registry: &Registry) {
    registry.register(INPROC, Arc::new(InprocProtocol::new()));

    #[cfg(feature = "zmq")]
    {
        let zmq: switchboard_core::protocol::ProtocolPtr =
            Arc::new(switchboard_zmtp::ZmtpProtocol::new());
        registry.register(switchboard_zmtp::ZMQ4, Arc::clone(&zmq));
        registry.register(switchboard_zmtp::ZMQ, zmq);
    }

    #[cfg(feature = "stomp")]
    registry.register(
        switchboard_stomp::STOMP,
        Arc::new(switchboard_stomp::StompProtocol::new()),
    );

    debug!(protocols = ?registry.names(), "[REGISTRY] Built-in backends installed");
}

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| {
    let registry = Registry::new();
    install_builtin(&registry);
    Arc::new(registry)
});

/// The process-wide registry used by facades without `with_registry`.
pub fn default_registry() -> Arc<Registry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_name_is_registered() {
        let registry = default_registry();
        for name in SUPPORTED_PROTOCOLS {
            assert!(registry.contains(name), "{name} missing");
        }
        assert_eq!(registry.names().len(), SUPPORTED_PROTOCOLS.len());
    }

    #[test]
    fn test_default_registry_is_shared() {
        assert!(Arc::ptr_eq(&default_registry(), &default_registry()));
    }

    #[test]
    #[should_panic(expected = "register called twice")]
    fn test_install_twice_panics() {
        let registry = Registry::new();
        install_builtin(&registry);
        install_builtin(&registry);
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("inproc"));
        assert!(!is_supported("amqp"));
        assert!(!is_supported(""));
        assert_eq!(is_supported("zmq"), cfg!(feature = "zmq"));
        assert_eq!(is_supported("stomp"), cfg!(feature = "stomp"));
    }

    #[cfg(feature = "zmq")]
    #[test]
    fn test_zmq4_is_the_zmq_backend() {
        let registry = Registry::new();
        install_builtin(&registry);
        let zmq = registry.load("zmq", &[]).unwrap();
        let zmq4 = registry.load("zmq4", &[]).unwrap();
        assert!(Arc::ptr_eq(&zmq, &zmq4));
        assert!(is_supported("zmq4"));
    }
}
