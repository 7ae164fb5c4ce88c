//! Server-side signaling relay
//!
//! One logical event-driven server: every inbound message is handled as one
//! atomic unit of work against the shared registry/fan-out/pairing state,
//! guarded by a single mutex. Outbound delivery is fire-and-forget: each
//! connection owns an unbounded channel its socket task drains, and the relay
//! never awaits network I/O while holding the lock.

use crate::identity::UserIdentity;
use crate::signaling::{ClientMessage, ServerMessage};
use crate::types::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod pairing;
pub mod presence;
pub mod registry;
mod router;

pub use pairing::{ActiveCallTracker, PinError};
pub use presence::{ContactDirectory, NoContacts, PresenceNotifier};
pub use registry::{ConnectionRegistry, PresenceEvent, Unregistered};

use router::InviteFanout;

/// Sender half of a connection's outbound channel
pub type OutboundSender<I> = mpsc::UnboundedSender<ServerMessage<I>>;

/// Everything the relay mutates, behind one lock.
pub(crate) struct RelayState<I: UserIdentity> {
    pub(crate) registry: ConnectionRegistry<I>,
    pub(crate) pairings: ActiveCallTracker,
    pub(crate) invites: HashMap<ConnectionId, InviteFanout<I>>,
    pub(crate) outbound: HashMap<ConnectionId, OutboundSender<I>>,
}

impl<I: UserIdentity> RelayState<I> {
    fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            pairings: ActiveCallTracker::new(),
            invites: HashMap::new(),
            outbound: HashMap::new(),
        }
    }

    /// Push a message onto a connection's outbound channel. A closed or
    /// missing channel is not an error here; the disconnect path owns cleanup.
    pub(crate) fn send(&self, connection: ConnectionId, message: ServerMessage<I>) {
        match self.outbound.get(&connection) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                tracing::debug!(%connection, "Dropping message for vanished connection");
            }
        }
    }
}

/// The signaling relay.
///
/// Transport-agnostic: the embedder accepts channels (WebSocket, in-process
/// duplex, anything ordered and bidirectional), calls [`Relay::connect`] with
/// the outbound sender, feeds inbound frames through [`Relay::handle_message`]
/// and calls [`Relay::disconnect`] exactly when the channel closes.
pub struct Relay<I: UserIdentity> {
    state: Mutex<RelayState<I>>,
    presence: PresenceNotifier<I>,
}

impl<I: UserIdentity> Relay<I> {
    /// Create a relay backed by the given contact directory
    pub fn new(directory: Arc<dyn ContactDirectory<I>>) -> Self {
        Self {
            state: Mutex::new(RelayState::new()),
            presence: PresenceNotifier::new(directory),
        }
    }

    /// Admit a new connection and hand back its server-assigned id.
    ///
    /// The connection is not routable until it registers an identity.
    pub fn connect(&self, sender: OutboundSender<I>) -> ConnectionId {
        let connection = ConnectionId::new();
        let mut state = self.state.lock();
        state.outbound.insert(connection, sender);
        tracing::debug!(%connection, "Connection admitted");
        connection
    }

    /// Process one inbound signaling message from a connection.
    #[tracing::instrument(skip(self, message), fields(%connection, message = message.name()))]
    pub fn handle_message(&self, connection: ConnectionId, message: ClientMessage<I>) {
        let mut state = self.state.lock();
        match message {
            ClientMessage::Register { identity } => {
                self.register(&mut state, connection, identity);
            }
            ClientMessage::Invite {
                from,
                to,
                offer,
                media,
            } => {
                let Some(registered) = state.registry.identity_of(connection).cloned() else {
                    tracing::warn!("Invite from unregistered connection");
                    state.send(
                        connection,
                        ServerMessage::Unreachable {
                            reason: "connection is not registered".to_string(),
                        },
                    );
                    return;
                };
                if registered != from {
                    tracing::warn!(claimed = %from, actual = %registered, "Invite identity mismatch");
                }
                router::route_invite(&mut state, connection, registered, to, offer, media);
            }
            ClientMessage::Accept {
                from,
                to_connection,
                answer,
            } => {
                let Some(registered) = state.registry.identity_of(connection).cloned() else {
                    tracing::warn!("Accept from unregistered connection");
                    return;
                };
                if registered != from {
                    tracing::warn!(claimed = %from, actual = %registered, "Accept identity mismatch");
                }
                router::route_accept(&mut state, connection, registered, to_connection, answer);
            }
            ClientMessage::Candidate {
                to_connection,
                candidate,
            } => {
                router::route_candidate(&mut state, connection, to_connection, candidate);
            }
            ClientMessage::End { to_connection } => {
                router::route_end(&mut state, connection, to_connection);
            }
        }
    }

    /// Handle a channel closing, for whatever reason.
    ///
    /// Abrupt loss is treated exactly like an explicit end: any ring rooted at
    /// or including this connection is cancelled, its pairing is torn down
    /// with the peer notified, and the registry transition fans out presence.
    /// Safe to call after an explicit end already cleaned the call up.
    #[tracing::instrument(skip(self), fields(%connection))]
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.state.lock();

        router::cancel_fanout(&mut state, connection, None);

        // The connection may itself be ringing on someone's invite.
        let mut emptied = Vec::new();
        state.invites.retain(|caller, fanout| {
            fanout.ringing.remove(&connection);
            if fanout.ringing.is_empty() {
                emptied.push((*caller, fanout.callee.clone()));
                false
            } else {
                true
            }
        });
        for (caller, callee) in emptied {
            state.send(
                caller,
                ServerMessage::Unreachable {
                    reason: format!("{callee} has no connected devices"),
                },
            );
        }

        if let Some(peer) = state.pairings.teardown(connection) {
            state.send(
                peer,
                ServerMessage::CallEnded {
                    from_connection: Some(connection),
                },
            );
        }

        let unregistered = state.registry.unregister(connection);
        state.outbound.remove(&connection);

        if let Some(unregistered) = unregistered {
            tracing::info!(identity = %unregistered.identity, "Connection disconnected");
            if let Some(event) = unregistered.went_offline {
                self.presence.broadcast_transition(&event, &state.registry, &mut |c, m| {
                    state.send(c, m);
                });
            }
        }
    }

    /// Whether an identity currently has at least one live connection
    pub fn is_online(&self, identity: &I) -> bool {
        self.state.lock().registry.is_online(identity)
    }

    /// Number of active call pairings
    pub fn active_calls(&self) -> usize {
        self.state.lock().pairings.len()
    }

    fn register(&self, state: &mut RelayState<I>, connection: ConnectionId, identity: I) {
        tracing::info!(%identity, %connection, "Registering connection");
        let events = state.registry.register(identity.clone(), connection);
        for event in &events {
            self.presence.broadcast_transition(event, &state.registry, &mut |c, m| {
                state.send(c, m);
            });
        }
        let snapshot = self.presence.snapshot_for(&identity, &state.registry);
        state.send(connection, snapshot);
    }
}
