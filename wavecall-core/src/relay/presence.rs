//! Presence fan-out
//!
//! Derives who needs to hear about an online/offline transition and builds
//! the one-time snapshot a freshly registered device receives.

use crate::identity::UserIdentity;
use crate::relay::registry::{ConnectionRegistry, PresenceEvent};
use crate::signaling::ServerMessage;
use crate::types::{ConnectionId, PresenceEntry};
use std::sync::Arc;

/// Contact lookup, supplied by the auth/profile collaborator.
///
/// The relay only reads from it; it never creates or edits contact links.
pub trait ContactDirectory<I: UserIdentity>: Send + Sync {
    /// The contacts of `identity` that should see its presence
    fn contacts_of(&self, identity: &I) -> Vec<I>;
}

/// A directory with no contact links. Presence fan-out becomes a no-op,
/// which is the right degradation when no directory collaborator is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContacts;

impl<I: UserIdentity> ContactDirectory<I> for NoContacts {
    fn contacts_of(&self, _identity: &I) -> Vec<I> {
        Vec::new()
    }
}

/// Presence notifier: turns registry transitions into per-connection sends.
pub struct PresenceNotifier<I: UserIdentity> {
    directory: Arc<dyn ContactDirectory<I>>,
}

impl<I: UserIdentity> PresenceNotifier<I> {
    /// Create a notifier backed by the given directory
    pub fn new(directory: Arc<dyn ContactDirectory<I>>) -> Self {
        Self { directory }
    }

    /// Fan an online/offline transition out to every live connection of every
    /// contact of the transitioning identity. `send` must not block.
    pub fn broadcast_transition(
        &self,
        event: &PresenceEvent<I>,
        registry: &ConnectionRegistry<I>,
        send: &mut dyn FnMut(ConnectionId, ServerMessage<I>),
    ) {
        let contacts = self.directory.contacts_of(&event.identity);
        tracing::debug!(
            identity = %event.identity,
            online = event.online,
            contacts = contacts.len(),
            "Broadcasting presence transition"
        );
        for contact in contacts {
            for connection in registry.connections_for(&contact) {
                send(
                    connection,
                    ServerMessage::PresenceUpdate {
                        identity: event.identity.clone(),
                        online: event.online,
                    },
                );
            }
        }
    }

    /// Build the one-time snapshot of all of `identity`'s contacts' current
    /// presence, pushed to a device right after it registers.
    pub fn snapshot_for(
        &self,
        identity: &I,
        registry: &ConnectionRegistry<I>,
    ) -> ServerMessage<I> {
        let contacts = self
            .directory
            .contacts_of(identity)
            .into_iter()
            .map(|contact| {
                let online = registry.is_online(&contact);
                PresenceEntry {
                    identity: contact,
                    online,
                }
            })
            .collect();
        ServerMessage::PresenceSnapshot { contacts }
    }
}
