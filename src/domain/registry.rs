//! Concurrent connection registry.
//!
//! [`Registry`] is the single source of truth for who receives
//! broadcasts. Membership lives behind one [`tokio::sync::RwLock`]; every
//! critical section is a plain map operation with no `.await` inside, so
//! neither mutation nor snapshot can stall behind a slow peer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::ConnectionState;
use super::{Connection, ConnectionId};
use crate::error::RelayError;

/// Set of currently connected clients.
///
/// Entries are kept in admission order so that a [`Snapshot`] iterates
/// connections in the order they joined.
///
/// # Concurrency
///
/// - `add`, `remove` and `drain` are mutually exclusive.
/// - `snapshot` and `len` run concurrently with each other.
/// - No lock is held while frames are delivered.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Members>,
}

#[derive(Debug, Default)]
struct Members {
    by_seq: BTreeMap<u64, Arc<Connection>>,
    index: HashMap<ConnectionId, u64>,
    next_seq: u64,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection.
    ///
    /// # Errors
    ///
    /// - [`RelayError::DuplicateIdentity`] if the id is already registered
    ///   (never happens with UUID v4 ids).
    /// - [`RelayError::TransportClosed`] if the connection is no longer
    ///   `Open`.
    pub async fn add(&self, connection: Arc<Connection>) -> Result<(), RelayError> {
        let id = connection.id();
        let mut members = self.inner.write().await;
        if members.index.contains_key(&id) {
            return Err(RelayError::DuplicateIdentity(id));
        }
        if connection.state() != ConnectionState::Open {
            return Err(RelayError::TransportClosed(id));
        }
        let seq = members.next_seq;
        members.next_seq = seq.wrapping_add(1);
        members.index.insert(id, seq);
        members.by_seq.insert(seq, connection);
        Ok(())
    }

    /// Removes a connection and closes it.
    ///
    /// Idempotent: disconnect handling and failed-send eviction may both
    /// try to remove the same id, and the second call is a no-op that
    /// returns `None`.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut members = self.inner.write().await;
        let seq = members.index.remove(&id)?;
        let connection = members.by_seq.remove(&seq)?;
        // Closed under the write lock: readers never observe a Closed member.
        connection.close();
        Some(connection)
    }

    /// Returns a point-in-time copy of the current membership.
    pub async fn snapshot(&self) -> Snapshot {
        let members = self.inner.read().await;
        Snapshot {
            connections: members.by_seq.values().map(Arc::clone).collect(),
        }
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    /// Removes and closes every connection. Used at shutdown.
    ///
    /// Returns how many connections were closed.
    pub async fn drain(&self) -> usize {
        let mut members = self.inner.write().await;
        members.index.clear();
        let drained = std::mem::take(&mut members.by_seq);
        let count = drained.len();
        for connection in drained.into_values() {
            connection.close();
        }
        count
    }
}

/// Immutable, ordered view of the registry taken under one read lock.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    connections: Vec<Arc<Connection>>,
}

impl Snapshot {
    /// Iterates the connections in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter()
    }

    /// Returns the number of connections in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Arc<Connection>;
    type IntoIter = std::slice::Iter<'a, Arc<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn open() -> Arc<Connection> {
        let (conn, _out) = Connection::open(ConnectionId::new(), None, 8);
        conn
    }

    fn ids(snapshot: &Snapshot) -> Vec<ConnectionId> {
        snapshot.iter().map(|c| c.id()).collect()
    }

    #[tokio::test]
    async fn add_makes_connection_visible() {
        let registry = Registry::new();
        let conn = open();
        let id = conn.id();

        assert_ok!(registry.add(conn).await);
        assert_eq!(ids(&registry.snapshot().await), vec![id]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = Registry::new();
        let id = ConnectionId::new();
        let (first, _a) = Connection::open(id, None, 8);
        let (second, _b) = Connection::open(id, None, 8);

        assert_ok!(registry.add(first).await);
        let Err(err) = registry.add(second).await else {
            panic!("expected duplicate identity");
        };
        assert!(matches!(err, RelayError::DuplicateIdentity(dup) if dup == id));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_connection_is_rejected() {
        let registry = Registry::new();
        let conn = open();
        conn.close();
        assert!(registry.add(conn).await.is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn remove_closes_and_is_idempotent() {
        let registry = Registry::new();
        let conn = open();
        let id = conn.id();
        assert_ok!(registry.add(Arc::clone(&conn)).await);

        let Some(removed) = registry.remove(id).await else {
            panic!("expected entry to be removed");
        };
        assert_eq!(removed.id(), id);
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert!(registry.remove(id).await.is_none());
        assert!(registry.remove(ConnectionId::new()).await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn snapshot_is_in_admission_order() {
        let registry = Registry::new();
        let conns: Vec<_> = (0..5).map(|_| open()).collect();
        for conn in &conns {
            assert_ok!(registry.add(Arc::clone(conn)).await);
        }
        let expected: Vec<_> = conns.iter().map(|c| c.id()).collect();
        assert_eq!(ids(&registry.snapshot().await), expected);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutation() {
        let registry = Registry::new();
        let a = open();
        let b = open();
        assert_ok!(registry.add(Arc::clone(&a)).await);
        assert_ok!(registry.add(Arc::clone(&b)).await);

        let snap = registry.snapshot().await;
        registry.remove(a.id()).await;
        assert_ok!(registry.add(open()).await);

        assert_eq!(snap.len(), 2);
        assert_eq!(ids(&snap), vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn count_after_connects_and_disconnects() {
        let registry = Arc::new(Registry::new());
        let conns: Vec<_> = (0..20).map(|_| open()).collect();

        let mut handles = Vec::new();
        for conn in &conns {
            let registry = Arc::clone(&registry);
            let conn = Arc::clone(conn);
            handles.push(tokio::spawn(async move { registry.add(conn).await }));
        }
        for handle in handles {
            let Ok(result) = handle.await else {
                panic!("add task panicked");
            };
            assert_ok!(result);
        }

        let mut handles = Vec::new();
        for conn in conns.iter().take(7) {
            let id = conn.id();
            // Two racing removals per connection.
            for _ in 0..2 {
                let registry = Arc::clone(&registry);
                handles.push(tokio::spawn(async move { registry.remove(id).await }));
            }
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        assert_eq!(registry.len().await, 13);
    }

    #[tokio::test]
    async fn drain_closes_everything() {
        let registry = Registry::new();
        let conns: Vec<_> = (0..3).map(|_| open()).collect();
        for conn in &conns {
            assert_ok!(registry.add(Arc::clone(conn)).await);
        }

        assert_eq!(registry.drain().await, 3);
        assert_eq!(registry.len().await, 0);
        assert!(
            conns
                .iter()
                .all(|c| c.state() == ConnectionState::Closed)
        );
    }
}
