//! Connection registry
//!
//! Maps user identities to their live signaling connections. A user connected
//! from several devices owns several connections; an identity is online iff
//! its connection set is non-empty.

use crate::identity::UserIdentity;
use crate::types::ConnectionId;
use std::collections::{HashMap, HashSet};

/// An identity crossing the online/offline boundary.
///
/// Emitted only on empty↔non-empty transitions of the identity's connection
/// set, exactly once per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent<I: UserIdentity> {
    /// Identity whose state changed
    pub identity: I,
    /// New binary state
    pub online: bool,
}

/// Result of removing a connection from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered<I: UserIdentity> {
    /// The identity the connection belonged to
    pub identity: I,
    /// Set when this was the identity's last connection
    pub went_offline: Option<PresenceEvent<I>>,
}

/// Identity ↔ connection-set maps.
///
/// Mutated only inside the relay's critical section; the registry itself
/// carries no lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry<I: UserIdentity> {
    by_identity: HashMap<I, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, I>,
}

impl<I: UserIdentity> ConnectionRegistry<I> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_identity: HashMap::new(),
            by_connection: HashMap::new(),
        }
    }

    /// Bind a connection to an identity.
    ///
    /// Idempotent for the same (identity, connection) pair. A connection
    /// already bound to a *different* identity is re-homed: removed from the
    /// old identity's set first, so it is never observable under two
    /// identities. Returns the presence transitions the operation caused, in
    /// order (an offline for the old identity before an online for the new).
    pub fn register(&mut self, identity: I, connection: ConnectionId) -> Vec<PresenceEvent<I>> {
        let mut events = Vec::new();

        match self.by_connection.get(&connection).cloned() {
            Some(current) if current == identity => return events,
            Some(_) => {
                if let Some(unregistered) = self.unregister(connection) {
                    if let Some(event) = unregistered.went_offline {
                        events.push(event);
                    }
                }
            }
            None => {}
        }

        let set = self.by_identity.entry(identity.clone()).or_default();
        let was_empty = set.is_empty();
        set.insert(connection);
        self.by_connection.insert(connection, identity.clone());

        if was_empty {
            events.push(PresenceEvent {
                identity,
                online: true,
            });
        }
        events
    }

    /// Remove a connection.
    ///
    /// Safe to call twice: the second call finds nothing and returns `None`.
    /// Both the explicit end-call path and the raw disconnect path may try to
    /// clean up the same connection.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<Unregistered<I>> {
        let identity = self.by_connection.remove(&connection)?;

        let went_offline = match self.by_identity.get_mut(&identity) {
            Some(set) => {
                set.remove(&connection);
                if set.is_empty() {
                    self.by_identity.remove(&identity);
                    Some(PresenceEvent {
                        identity: identity.clone(),
                        online: false,
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        Some(Unregistered {
            identity,
            went_offline,
        })
    }

    /// Live connections of an identity, empty when offline
    pub fn connections_for(&self, identity: &I) -> Vec<ConnectionId> {
        self.by_identity
            .get(identity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The identity a connection is bound to, if registered
    pub fn identity_of(&self, connection: ConnectionId) -> Option<&I> {
        self.by_connection.get(&connection)
    }

    /// Whether an identity has at least one live connection
    pub fn is_online(&self, identity: &I) -> bool {
        self.by_identity
            .get(identity)
            .is_some_and(|set| !set.is_empty())
    }
}
