use std::{collections::HashMap, fmt::Debug, sync::Arc};

use tokio::sync::RwLock;

use crate::{InterfaceIndex, MemifSocketAddDel, Role};

/// A table keyed by (connection id, role). It can be shared between multiple
/// owners and accessed concurrently; no lock is held once a call returns.
pub struct ConnectionStore<V> {
    inner: Arc<RwLock<HashMap<(String, Role), V>>>,
}

impl<V> Clone for ConnectionStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for ConnectionStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Debug> Debug for ConnectionStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_read() {
            Ok(map) => f.debug_struct("ConnectionStore").field("entries", &*map).finish(),
            Err(_) => f.debug_struct("ConnectionStore").finish_non_exhaustive(),
        }
    }
}

impl<V> ConnectionStore<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert `value`, returning the entry it replaced.
    pub async fn store(&self, conn_id: &str, role: Role, value: V) -> Option<V> {
        self.inner
            .write()
            .await
            .insert((conn_id.to_string(), role), value)
    }

    pub async fn delete(&self, conn_id: &str, role: Role) -> Option<V> {
        self.inner
            .write()
            .await
            .remove(&(conn_id.to_string(), role))
    }

    pub async fn contains(&self, conn_id: &str, role: Role) -> bool {
        self.inner
            .read()
            .await
            .contains_key(&(conn_id.to_string(), role))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl<V: PartialEq> ConnectionStore<V> {
    /// Remove the entry only while it still holds `value`. Returns whether it did.
    pub async fn delete_if_eq(&self, conn_id: &str, role: Role, value: &V) -> bool {
        let mut map = self.inner.write().await;
        let key = (conn_id.to_string(), role);
        if map.get(&key) == Some(value) {
            map.remove(&key);
            true
        } else {
            false
        }
    }
}

impl<V: Clone> ConnectionStore<V> {
    pub async fn load(&self, conn_id: &str, role: Role) -> Option<V> {
        self.inner
            .read()
            .await
            .get(&(conn_id.to_string(), role))
            .cloned()
    }
}

/// Interface handle provisioned for each connection.
pub type IfIndexStore = ConnectionStore<InterfaceIndex>;
/// Memif sockets waiting to be handed over to an existing connection.
pub type MemifSocketStore = ConnectionStore<MemifSocketAddDel>;

/// What a handler created for a connection. The shared ifindex entry may have
/// been replaced by another element since, so teardown goes by `sw_if_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Provisioned<M> {
    pub mechanism: M,
    pub sw_if_index: InterfaceIndex,
}

/// Per-connection state shared by every element of a chain.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub ifindex: IfIndexStore,
    pub memif_sockets: MemifSocketStore,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }
}
