//! Last-read value lookup for host ports.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::port::NullablePortValue;

/// Resolves port identifiers to their most recently observed value.
pub trait PortRegistry: Send + Sync {
    /// Last value read from the port.
    ///
    /// Returns `None` when the port is unknown, and `Some(None)` when the
    /// port exists but has no value yet.
    fn last_read_value(&self, port_id: &str) -> Option<NullablePortValue>;
}

/// In-memory port table fed by the event bus.
#[derive(Debug, Default)]
pub struct PortTable {
    ports: RwLock<HashMap<String, NullablePortValue>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given ports declared.
    pub fn with_ports<I, S>(port_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = Self::new();
        for port_id in port_ids {
            table.declare(port_id);
        }
        table
    }

    /// Register a port without a value.
    pub fn declare(&self, port_id: impl Into<String>) {
        self.ports.write().entry(port_id.into()).or_insert(None);
    }

    /// Store a new value for a declared port, returning the previous one.
    ///
    /// Undeclared ports are left out of the table and yield `None`.
    pub fn update(&self, port_id: &str, value: NullablePortValue) -> Option<NullablePortValue> {
        let mut ports = self.ports.write();
        let slot = ports.get_mut(port_id)?;
        Some(std::mem::replace(slot, value))
    }

    /// Number of known ports.
    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}

impl PortRegistry for PortTable {
    fn last_read_value(&self, port_id: &str) -> Option<NullablePortValue> {
        self.ports.read().get(port_id).cloned()
    }
}
