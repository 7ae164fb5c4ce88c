//! Call routing
//!
//! Stateless forwarding decisions over the relay's shared state: invite
//! fan-out to every device of the callee, convergence onto a single pairing at
//! first accept, verbatim candidate forwarding, and end-of-call cleanup.

use crate::identity::UserIdentity;
use crate::relay::RelayState;
use crate::signaling::ServerMessage;
use crate::types::{CallTarget, CandidateInit, ConnectionId, MediaKind, SessionDescription};
use std::collections::HashSet;

/// Transient record of an invite that is still ringing.
///
/// Keyed by the caller's connection. Replaced by a single pairing entry on
/// the first accept; the remaining recipients are told to stop ringing.
#[derive(Debug)]
pub(crate) struct InviteFanout<I: UserIdentity> {
    pub(crate) callee: I,
    pub(crate) ringing: HashSet<ConnectionId>,
}

/// Ring every live connection of the target.
///
/// An empty connection set yields exactly one `unreachable` to the caller.
/// Group targets are refused here, at the entry point.
pub(crate) fn route_invite<I: UserIdentity>(
    state: &mut RelayState<I>,
    caller_connection: ConnectionId,
    from: I,
    to: CallTarget<I>,
    offer: SessionDescription,
    media: MediaKind,
) {
    let callee = match to {
        CallTarget::Individual { id } => id,
        CallTarget::Group { id } => {
            tracing::debug!(group = %id, "Refusing group call target");
            state.send(
                caller_connection,
                ServerMessage::Unreachable {
                    reason: "group calls are not supported".to_string(),
                },
            );
            return;
        }
    };

    if state.pairings.is_paired(caller_connection) {
        state.send(
            caller_connection,
            ServerMessage::Unreachable {
                reason: "connection is already in an active call".to_string(),
            },
        );
        return;
    }

    // A re-invite from the same connection supersedes its previous ring.
    cancel_fanout(state, caller_connection, None);

    let ringing: HashSet<ConnectionId> = state
        .registry
        .connections_for(&callee)
        .into_iter()
        .filter(|c| *c != caller_connection)
        .collect();

    if ringing.is_empty() {
        tracing::debug!(callee = %callee, "Invite target unreachable");
        state.send(
            caller_connection,
            ServerMessage::Unreachable {
                reason: format!("{callee} has no connected devices"),
            },
        );
        return;
    }

    tracing::info!(
        caller = %from,
        callee = %callee,
        devices = ringing.len(),
        "Routing invite to all callee devices"
    );
    for connection in &ringing {
        state.send(
            *connection,
            ServerMessage::Invite {
                from: from.clone(),
                from_connection: caller_connection,
                offer: offer.clone(),
                media,
            },
        );
    }
    state
        .invites
        .insert(caller_connection, InviteFanout { callee, ringing });
}

/// Converge a ringing invite onto one pairing.
///
/// First accept wins: the pair is pinned, the answer goes back to the caller's
/// specific connection, and every other ringing device is told to stop. A late
/// or duplicate accept (the fan-out is gone, or a pairing already exists)
/// is answered with `call-ended` and never forwarded.
pub(crate) fn route_accept<I: UserIdentity>(
    state: &mut RelayState<I>,
    accepter_connection: ConnectionId,
    from: I,
    caller_connection: ConnectionId,
    answer: SessionDescription,
) {
    let accept_valid = state
        .invites
        .get(&caller_connection)
        .is_some_and(|fanout| fanout.ringing.contains(&accepter_connection))
        && !state.pairings.is_paired(caller_connection)
        && !state.pairings.is_paired(accepter_connection);

    if !accept_valid {
        tracing::debug!(
            accepter = %accepter_connection,
            caller = %caller_connection,
            "Rejecting late or duplicate accept"
        );
        state.send(
            accepter_connection,
            ServerMessage::CallEnded {
                from_connection: None,
            },
        );
        return;
    }

    if let Some(fanout) = state.invites.remove(&caller_connection) {
        for other in fanout.ringing {
            if other != accepter_connection {
                state.send(other, ServerMessage::InviteCancelled);
            }
        }
    }

    match state.pairings.pin(caller_connection, accepter_connection) {
        Ok(()) => {
            tracing::info!(
                caller = %caller_connection,
                accepter = %accepter_connection,
                "Call pairing pinned"
            );
            state.send(
                caller_connection,
                ServerMessage::Accept {
                    from,
                    from_connection: accepter_connection,
                    answer,
                },
            );
        }
        Err(err) => {
            tracing::warn!(%err, "Pairing failed after accept validation");
            state.send(
                accepter_connection,
                ServerMessage::CallEnded {
                    from_connection: None,
                },
            );
        }
    }
}

/// Forward a candidate verbatim to the named connection, tagged with the
/// sender. A candidate for a connection that no longer exists is dropped.
pub(crate) fn route_candidate<I: UserIdentity>(
    state: &mut RelayState<I>,
    from_connection: ConnectionId,
    to_connection: ConnectionId,
    candidate: CandidateInit,
) {
    if !state.outbound.contains_key(&to_connection) {
        tracing::debug!(
            target = %to_connection,
            "Dropping candidate for unknown connection"
        );
        return;
    }
    state.send(
        to_connection,
        ServerMessage::Candidate {
            from_connection,
            candidate,
        },
    );
}

/// Hang up, decline, or withdraw.
///
/// Cancels any fan-out rooted at either side, tears down any pairing involving
/// the sender or the target, and notifies the peer exactly once.
pub(crate) fn route_end<I: UserIdentity>(
    state: &mut RelayState<I>,
    from_connection: ConnectionId,
    to_connection: Option<ConnectionId>,
) {
    // A caller withdrawing its own ring.
    cancel_fanout(state, from_connection, None);

    // A ringing device declining: silence the callee's other devices too.
    if let Some(target) = to_connection {
        cancel_fanout(state, target, Some(from_connection));
    }

    match state.pairings.teardown(from_connection) {
        Some(peer) => {
            state.send(
                peer,
                ServerMessage::CallEnded {
                    from_connection: Some(from_connection),
                },
            );
        }
        None => {
            // Not paired: forward the end to the named target, if it is live.
            if let Some(target) = to_connection {
                if state.outbound.contains_key(&target) {
                    state.send(
                        target,
                        ServerMessage::CallEnded {
                            from_connection: Some(from_connection),
                        },
                    );
                }
            }
        }
    }

    // The target may be pinned to a third connection; that pairing dies too.
    if let Some(target) = to_connection {
        if let Some(peer) = state.pairings.teardown(target) {
            state.send(
                peer,
                ServerMessage::CallEnded {
                    from_connection: Some(target),
                },
            );
        }
    }
}

/// Remove a fan-out rooted at `caller_connection` and silence its remaining
/// ringing devices, `exclude` excepted. No-op when no fan-out exists.
pub(crate) fn cancel_fanout<I: UserIdentity>(
    state: &mut RelayState<I>,
    caller_connection: ConnectionId,
    exclude: Option<ConnectionId>,
) {
    if let Some(fanout) = state.invites.remove(&caller_connection) {
        tracing::debug!(
            caller = %caller_connection,
            callee = %fanout.callee,
            "Cancelling invite fan-out"
        );
        for connection in fanout.ringing {
            if Some(connection) != exclude {
                state.send(connection, ServerMessage::InviteCancelled);
            }
        }
    }
}
