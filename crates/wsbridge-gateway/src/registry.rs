//! Active connection registry
//!
//! Presence-only bookkeeping of client connections that are currently
//! bridged. The lock is held only for the set mutation itself.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;
use uuid::Uuid;

/// Identity of one client-facing connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Set of active client connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection was already registered.
    pub fn register(&self, id: ConnectionId) -> bool {
        self.connections.lock().insert(id)
    }

    /// Returns `false` if the connection was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.lock().remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_unregister_pairing() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();

        assert!(registry.register(id));
        assert!(!registry.register(id), "double register must be refused");
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_mutation() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let id = ConnectionId::new();
                assert!(registry.register(id));
                tokio::task::yield_now().await;
                assert!(registry.unregister(&id));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.is_empty());
    }
}
