//! Protocol registry: which backend answers to which name.
//!
//! Backends are compiled in and registered once during startup wiring.
//! Lookups happen on every connect and may run concurrently from many
//! facades. A single lock guards the map; it is held for the map access and
//! the backend's `init`, never for I/O.
//!
//! ```rust
//! use std::sync::Arc;
//! use switchboard_core::inproc::InprocProtocol;
//! use switchboard_core::registry::Registry;
//!
//! let registry = Registry::new();
//! registry.register("inproc", Arc::new(InprocProtocol::new()));
//! assert!(registry.contains("inproc"));
//! assert!(registry.load("inproc", &[]).is_ok());
//! ```

use crate::error::{Result, SwitchboardError};
use crate::protocol::ProtocolPtr;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Name → backend table.
#[derive(Default)]
pub struct Registry {
    protocols: Mutex<HashMap<String, ProtocolPtr>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `protocol` under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or already registered. Both mean the build is
    /// wired incorrectly; neither is a runtime condition callers can handle.
    pub fn register(&self, name: &str, protocol: ProtocolPtr) {
        let mut protocols = self.protocols.lock();
        if name.is_empty() {
            panic!("registry: protocol registered without a name");
        }
        if protocols.contains_key(name) {
            panic!("registry: register called twice for protocol {name:?}");
        }
        debug!(protocol = name, "[REGISTRY] Registered protocol");
        protocols.insert(name.to_string(), protocol);
    }

    /// Look up `name` and initialize it with `args`.
    ///
    /// `init` runs exactly once per call, with `args` unmodified and in order.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing is registered under `name`; otherwise whatever
    /// the backend's `init` returns.
    pub fn load(&self, name: &str, args: &[String]) -> Result<ProtocolPtr> {
        let protocols = self.protocols.lock();
        let protocol = protocols
            .get(name)
            .ok_or_else(|| SwitchboardError::NotFound(name.to_string()))?;
        protocol.init(args)?;
        debug!(protocol = name, args = args.len(), "[REGISTRY] Loaded protocol");
        Ok(protocol.clone())
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.protocols.lock().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.protocols.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("protocols", &self.names())
            .finish()
    }
}
