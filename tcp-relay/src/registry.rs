use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, MutexGuard};

use crate::connection::{Connection, ConnectionId};

/// Live connections available as broadcast targets.
///
/// A single lock guards membership. Holding [`Members`] blocks inserts,
/// removals and other broadcasts until it is dropped.
#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a connection with the same id is already registered.
    pub async fn insert(&self, connection: Arc<Connection>) -> bool {
        let mut members = self.members.lock().await;
        let id = connection.id();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, connection);
        true
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.members.lock().await.remove(&id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Locks the member set for the duration of one broadcast.
    pub async fn lock(&self) -> Members<'_> {
        Members {
            guard: self.members.lock().await,
        }
    }
}

pub struct Members<'a> {
    guard: MutexGuard<'a, HashMap<ConnectionId, Arc<Connection>>>,
}

impl Members<'_> {
    /// Every member except `origin`, in unspecified order.
    pub fn except(&self, origin: ConnectionId) -> impl Iterator<Item = &Arc<Connection>> + '_ {
        self.guard
            .iter()
            .filter(move |(id, _)| **id != origin)
            .map(|(_, connection)| connection)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}
