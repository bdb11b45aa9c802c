//! Shared connection registry
//!
//! Every channel that targets the same endpoint multiplexes over one
//! connection. The registry owns that mapping and the reference counts that
//! decide when a connection is torn down.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::address::EndpointKey;
use crate::config::ClientConfig;
use crate::connection::{self, ConnectionHandle};

/// Registry of live connections, keyed by endpoint
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    config: ClientConfig,
    connections: DashMap<EndpointKey, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connections: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connection currently serving `key`
    pub fn get(&self, key: &EndpointKey) -> Option<ConnectionHandle> {
        self.inner.connections.get(key).map(|c| c.clone())
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Endpoints with a live connection
    pub fn endpoints(&self) -> Vec<EndpointKey> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get or create the connection for `key` and take a reference on it
    ///
    /// The reference is taken while the entry is locked, so a connection
    /// that is concurrently dropping to zero either sees the new reference
    /// or has already left the registry.
    pub(crate) fn acquire(&self, key: &EndpointKey) -> ConnectionHandle {
        let handle = match self.inner.connections.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => {
                let handle = entry.get().clone();
                handle.acquire();
                handle
            }
            Entry::Occupied(mut entry) => {
                tracing::debug!("Replacing closed connection to {}", key);
                let handle = self.spawn(key);
                handle.acquire();
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(key);
                handle.acquire();
                entry.insert(handle.clone());
                handle
            }
        };

        tracing::trace!(
            "Acquired connection to {} (refcount {})",
            key,
            handle.refcount()
        );
        handle
    }

    fn spawn(&self, key: &EndpointKey) -> ConnectionHandle {
        tracing::debug!("Creating new connection to {}", key);
        connection::spawn(
            key.clone(),
            self.inner.config.clone(),
            Arc::downgrade(&self.inner),
        )
    }
}

impl RegistryInner {
    /// Remove `handle` if it is still registered and has no references
    ///
    /// Returns false when another channel took a reference in the meantime.
    pub(crate) fn remove_idle(&self, key: &EndpointKey, handle: &ConnectionHandle) -> bool {
        match self.connections.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().ptr_eq(handle) => {
                if entry.get().refcount() != 0 {
                    return false;
                }
                entry.remove();
                true
            }
            _ => true,
        }
    }

    /// Remove `handle` regardless of its references
    pub(crate) fn remove(&self, key: &EndpointKey, handle: &ConnectionHandle) {
        self.connections
            .remove_if(key, |_, registered| registered.ptr_eq(handle));
    }
}
