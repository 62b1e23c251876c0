//! The authoritative map from [`ClientId`] to a writable connection.
//!
//! Only the dispatcher holds a registry, so nothing here is synchronized.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::{io::WriteHalf, task::JoinHandle};

use crate::protocol::ClientId;

/// A registered client: the write side of its stream plus the task reading
/// the other side.
pub struct ClientEntry<S> {
    pub writer: WriteHalf<S>,
    pub peer: SocketAddr,
    pub reader: JoinHandle<()>,
}

pub struct ClientRegistry<S> {
    clients: HashMap<ClientId, ClientEntry<S>>,
}

impl<S> Default for ClientRegistry<S> {
    fn default() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }
}

impl<S> ClientRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry` under `id`. Ids are unique for the process lifetime, so an
    /// existing entry is never replaced; the rejected entry is handed back.
    pub fn insert(&mut self, id: ClientId, entry: ClientEntry<S>) -> Result<(), ClientEntry<S>> {
        if self.clients.contains_key(&id) {
            return Err(entry);
        }
        self.clients.insert(id, entry);
        Ok(())
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientEntry<S>> {
        self.clients.remove(&id)
    }

    #[cfg(test)]
    fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every entry except `sender`'s, in unspecified order.
    pub fn recipients_mut(
        &mut self,
        sender: ClientId,
    ) -> impl Iterator<Item = (ClientId, &mut ClientEntry<S>)> {
        self.clients
            .iter_mut()
            .filter(move |(id, _)| **id != sender)
            .map(|(id, entry)| (*id, entry))
    }
}
