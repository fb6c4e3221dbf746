use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

use crate::store::AgencyId;

/// Asks a single session to close its socket
///
/// a close request is never lost, even when the session isn't waiting on it yet.
#[derive(Debug, Clone, Default)]
pub struct Closer {
    notify: Arc<Notify>,
}

impl Closer {
    pub fn close(&self) {
        self.notify.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.notify.notified().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    // sockets that are still mid-handshake
    Unregistered(SocketAddr),
    // an agency may hold more than one live socket, e.g. when it reconnects to consult
    Registered(AgencyId, SocketAddr),
}

#[derive(thiserror::Error, Debug)]
#[error("The registry no longer accepts connections")]
pub struct RegistryClosed;

#[derive(Debug, Default)]
struct Inner {
    closed: bool,
    unregistered: HashMap<SocketAddr, Closer>,
    registered: HashMap<AgencyId, HashMap<SocketAddr, Closer>>,
}

/// Tracks every live session socket, so they can all be closed on shutdown
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly accepted socket
    ///
    /// the entry is removed once the returned registration is dropped.
    /// fails once the registry was closed by `close_all`.
    pub fn insert_unregistered(&self, peer: SocketAddr) -> Result<Registration, RegistryClosed> {
        let closer = Closer::default();

        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(RegistryClosed);
        }
        inner.unregistered.insert(peer, closer.clone());

        Ok(Registration {
            registry: self.clone(),
            key: Key::Unregistered(peer),
            closer,
        })
    }

    fn promote(&self, peer: SocketAddr, agency: AgencyId) -> Option<Closer> {
        let mut inner = self.inner.lock().unwrap();
        let closer = inner.unregistered.remove(&peer)?;
        inner
            .registered
            .entry(agency)
            .or_default()
            .insert(peer, closer.clone());

        Some(closer)
    }

    /// Removes an entry, returns false if it was already gone
    pub fn remove(&self, key: Key) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match key {
            Key::Unregistered(peer) => inner.unregistered.remove(&peer).is_some(),
            Key::Registered(agency, peer) => {
                let Some(sockets) = inner.registered.get_mut(&agency) else {
                    return false;
                };

                let removed = sockets.remove(&peer).is_some();
                if sockets.is_empty() {
                    inner.registered.remove(&agency);
                }
                removed
            }
        }
    }

    /// Stops accepting new entries and asks every tracked socket to close
    ///
    /// returns the number of sockets that were asked to close.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;

        let closers = inner
            .unregistered
            .values()
            .chain(inner.registered.values().flat_map(HashMap::values));

        let mut count = 0;
        for closer in closers {
            closer.close();
            count += 1;
        }

        count
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.unregistered.len() + inner.registered.values().map(HashMap::len).sum::<usize>()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn is_registered(&self, agency: AgencyId) -> bool {
        self.inner.lock().unwrap().registered.contains_key(&agency)
    }
}

/// A session's entry in the registry
///
/// dropping it removes the entry, whichever way the session ended.
#[derive(Debug)]
pub struct Registration {
    registry: Registry,
    key: Key,
    closer: Closer,
}

impl Registration {
    #[cfg(test)]
    pub fn key(&self) -> Key {
        self.key
    }

    pub fn closer(&self) -> &Closer {
        &self.closer
    }

    /// Moves the entry from the unregistered sockets to the agency's sockets
    ///
    /// returns false if the entry was already removed, or was already promoted.
    pub fn promote(&mut self, agency: AgencyId) -> bool {
        let Key::Unregistered(peer) = self.key else {
            return false;
        };

        match self.registry.promote(peer, agency) {
            Some(_) => {
                self.key = Key::Registered(agency, peer);
                true
            }
            None => false,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.key);
    }
}
