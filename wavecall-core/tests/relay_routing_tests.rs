//! Relay routing tests
//!
//! Exercises invite fan-out, accept convergence, presence, and teardown
//! against an in-process relay with channel-backed connections.

use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use wavecall_core::{
    CallTarget, CandidateInit, ClientMessage, ConnectionId, ContactDirectory, MediaKind,
    NoContacts, Relay, ServerMessage, SessionDescription, UserId,
};

struct Device {
    connection: ConnectionId,
    rx: mpsc::UnboundedReceiver<ServerMessage<UserId>>,
}

impl Device {
    fn connect(relay: &Relay<UserId>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = relay.connect(tx);
        Self { connection, rx }
    }

    fn connect_as(relay: &Relay<UserId>, identity: &str) -> Self {
        let mut device = Self::connect(relay);
        relay.handle_message(
            device.connection,
            ClientMessage::Register {
                identity: UserId::new(identity),
            },
        );
        // Swallow the registration snapshot
        let drained = device.drain();
        assert!(matches!(
            drained.first(),
            Some(ServerMessage::PresenceSnapshot { .. })
        ));
        device
    }

    fn drain(&mut self) -> Vec<ServerMessage<UserId>> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

struct Roster(HashMap<UserId, Vec<UserId>>);

impl Roster {
    fn mutual(a: &str, b: &str) -> Arc<Self> {
        let mut map = HashMap::new();
        map.insert(UserId::new(a), vec![UserId::new(b)]);
        map.insert(UserId::new(b), vec![UserId::new(a)]);
        Arc::new(Self(map))
    }
}

impl ContactDirectory<UserId> for Roster {
    fn contacts_of(&self, identity: &UserId) -> Vec<UserId> {
        self.0.get(identity).cloned().unwrap_or_default()
    }
}

fn relay() -> Relay<UserId> {
    Relay::new(Arc::new(NoContacts))
}

fn invite_to(callee: &str) -> ClientMessage<UserId> {
    ClientMessage::Invite {
        from: UserId::new("caller"),
        to: CallTarget::Individual {
            id: UserId::new(callee),
        },
        offer: SessionDescription::new("v=0 offer"),
        media: MediaKind::Video,
    }
}

fn accept_of(from: &str, to_connection: ConnectionId) -> ClientMessage<UserId> {
    ClientMessage::Accept {
        from: UserId::new(from),
        to_connection,
        answer: SessionDescription::new("v=0 answer"),
    }
}

#[tokio::test]
async fn offline_target_yields_exactly_one_unreachable() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");

    relay.handle_message(caller.connection, invite_to("ghost"));

    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::Unreachable { .. }));
}

#[tokio::test]
async fn invite_rings_every_callee_device() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut b1 = Device::connect_as(&relay, "callee");
    let mut b2 = Device::connect_as(&relay, "callee");
    let mut b3 = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));

    for device in [&mut b1, &mut b2, &mut b3] {
        let messages = device.drain();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Invite {
                from,
                from_connection,
                media,
                ..
            } => {
                assert_eq!(*from, UserId::new("caller"));
                assert_eq!(*from_connection, caller.connection);
                assert_eq!(*media, MediaKind::Video);
            }
            other => panic!("expected invite, got {other:?}"),
        }
    }
    assert!(caller.drain().is_empty());
}

#[tokio::test]
async fn first_accept_wins_and_losers_stop_ringing() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut b1 = Device::connect_as(&relay, "callee");
    let mut b2 = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    b1.drain();
    b2.drain();

    relay.handle_message(b2.connection, accept_of("callee", caller.connection));

    // The answer reaches the caller's specific connection, tagged with b2
    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ServerMessage::Accept {
            from_connection, ..
        } => assert_eq!(*from_connection, b2.connection),
        other => panic!("expected accept, got {other:?}"),
    }

    // The losing device is told to stop ringing
    let messages = b1.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::InviteCancelled));

    assert_eq!(relay.active_calls(), 1);
}

#[tokio::test]
async fn late_accept_is_rejected_not_forwarded() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut b1 = Device::connect_as(&relay, "callee");
    let mut b2 = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    b1.drain();
    b2.drain();

    relay.handle_message(b2.connection, accept_of("callee", caller.connection));
    caller.drain();
    b1.drain();

    // b1's accept arrives after the pairing exists
    relay.handle_message(b1.connection, accept_of("callee", caller.connection));

    let messages = b1.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::CallEnded { .. }));
    assert!(caller.drain().is_empty());
    assert_eq!(relay.active_calls(), 1);
}

#[tokio::test]
async fn end_then_disconnect_notifies_peer_once() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut callee = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    callee.drain();
    relay.handle_message(callee.connection, accept_of("callee", caller.connection));
    caller.drain();

    // Explicit end followed by the raw disconnect of the same connection
    relay.handle_message(
        caller.connection,
        ClientMessage::End {
            to_connection: Some(callee.connection),
        },
    );
    relay.disconnect(caller.connection);

    let ended: Vec<_> = callee
        .drain()
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::CallEnded { .. }))
        .collect();
    assert_eq!(ended.len(), 1);
    assert_eq!(relay.active_calls(), 0);
}

#[tokio::test]
async fn candidates_are_forwarded_tagged_with_sender() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut callee = Device::connect_as(&relay, "callee");

    let candidate = CandidateInit {
        candidate: "candidate:0 1 udp 1 192.0.2.7 9 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    };
    relay.handle_message(
        caller.connection,
        ClientMessage::Candidate {
            to_connection: callee.connection,
            candidate: candidate.clone(),
        },
    );

    let messages = callee.drain();
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ServerMessage::Candidate {
            from_connection,
            candidate: forwarded,
        } => {
            assert_eq!(*from_connection, caller.connection);
            assert_eq!(*forwarded, candidate);
        }
        other => panic!("expected candidate, got {other:?}"),
    }
}

#[tokio::test]
async fn candidate_for_vanished_connection_is_dropped() {
    let relay = relay();
    let caller = Device::connect_as(&relay, "caller");
    let gone = {
        let dead = Device::connect_as(&relay, "callee");
        relay.disconnect(dead.connection);
        dead.connection
    };

    relay.handle_message(
        caller.connection,
        ClientMessage::Candidate {
            to_connection: gone,
            candidate: CandidateInit {
                candidate: "candidate:0".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        },
    );
    // Nothing crashes, nothing bounces back
}

#[tokio::test]
async fn group_targets_are_refused_at_the_entry() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");

    relay.handle_message(
        caller.connection,
        ClientMessage::Invite {
            from: UserId::new("caller"),
            to: CallTarget::Group {
                id: "work-team".to_string(),
            },
            offer: SessionDescription::new("v=0"),
            media: MediaKind::Audio,
        },
    );

    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ServerMessage::Unreachable { reason } => {
            assert!(reason.contains("group"));
        }
        other => panic!("expected unreachable, got {other:?}"),
    }
}

#[tokio::test]
async fn invite_from_unregistered_connection_is_refused() {
    let relay = relay();
    let mut stranger = Device::connect(&relay);

    relay.handle_message(stranger.connection, invite_to("callee"));

    let messages = stranger.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::Unreachable { .. }));
}

#[tokio::test]
async fn caller_hangup_while_ringing_cancels_all_devices() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut b1 = Device::connect_as(&relay, "callee");
    let mut b2 = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    b1.drain();
    b2.drain();

    // The caller does not know which connections are ringing
    relay.handle_message(caller.connection, ClientMessage::End { to_connection: None });

    for device in [&mut b1, &mut b2] {
        let messages = device.drain();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::InviteCancelled));
    }
    assert_eq!(relay.active_calls(), 0);
}

#[tokio::test]
async fn decline_on_one_device_silences_the_others() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut b1 = Device::connect_as(&relay, "callee");
    let mut b2 = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    b1.drain();
    b2.drain();

    relay.handle_message(
        b1.connection,
        ClientMessage::End {
            to_connection: Some(caller.connection),
        },
    );

    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::CallEnded { .. }));

    let messages = b2.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::InviteCancelled));

    assert!(b1.drain().is_empty());
}

#[tokio::test]
async fn last_ringing_device_disconnecting_unblocks_the_caller() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let callee = Device::connect_as(&relay, "callee");

    relay.handle_message(caller.connection, invite_to("callee"));
    caller.drain();

    relay.disconnect(callee.connection);

    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::Unreachable { .. }));
}

#[tokio::test]
async fn busy_connection_cannot_invite_again() {
    let relay = relay();
    let mut caller = Device::connect_as(&relay, "caller");
    let mut callee = Device::connect_as(&relay, "callee");
    let mut third = Device::connect_as(&relay, "third");

    relay.handle_message(caller.connection, invite_to("callee"));
    callee.drain();
    relay.handle_message(callee.connection, accept_of("callee", caller.connection));
    caller.drain();

    relay.handle_message(caller.connection, invite_to("third"));

    let messages = caller.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ServerMessage::Unreachable { .. }));
    assert!(third.drain().is_empty());
}

#[tokio::test]
async fn presence_transitions_and_snapshot() {
    let relay = Relay::new(Roster::mutual("alice", "bob"));
    let mut bob = Device::connect(&relay);
    relay.handle_message(
        bob.connection,
        ClientMessage::Register {
            identity: UserId::new("bob"),
        },
    );

    // Bob's snapshot shows alice offline
    let messages = bob.drain();
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ServerMessage::PresenceSnapshot { contacts } => {
            assert_eq!(contacts.len(), 1);
            assert_eq!(contacts[0].identity, UserId::new("alice"));
            assert!(!contacts[0].online);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    // Alice's first device: bob hears she came online
    let alice1 = Device::connect_as(&relay, "alice");
    let messages = bob.drain();
    assert_eq!(
        messages,
        vec![ServerMessage::PresenceUpdate {
            identity: UserId::new("alice"),
            online: true,
        }]
    );

    // Second device: no transition
    let alice2 = Device::connect_as(&relay, "alice");
    assert!(bob.drain().is_empty());

    // First device leaves: still online
    relay.disconnect(alice1.connection);
    assert!(bob.drain().is_empty());

    // Last device leaves: offline
    relay.disconnect(alice2.connection);
    assert_eq!(
        bob.drain(),
        vec![ServerMessage::PresenceUpdate {
            identity: UserId::new("alice"),
            online: false,
        }]
    );
}

/// Full scenario: A invites B (video); B has two live connections; both ring;
/// the second accepts; A ends. Both pinned sides are released and the first
/// device was never pinned at all.
#[tokio::test]
async fn ring_two_devices_accept_one_end_call() {
    let relay = relay();
    let mut a = Device::connect_as(&relay, "a");
    let mut b1 = Device::connect_as(&relay, "b");
    let mut b2 = Device::connect_as(&relay, "b");

    relay.handle_message(a.connection, invite_to("b"));

    assert!(matches!(
        b1.drain().as_slice(),
        [ServerMessage::Invite { .. }]
    ));
    assert!(matches!(
        b2.drain().as_slice(),
        [ServerMessage::Invite { .. }]
    ));

    relay.handle_message(b2.connection, accept_of("b", a.connection));

    match a.drain().as_slice() {
        [ServerMessage::Accept {
            from_connection, ..
        }] => assert_eq!(*from_connection, b2.connection),
        other => panic!("expected accept, got {other:?}"),
    }
    assert!(matches!(
        b1.drain().as_slice(),
        [ServerMessage::InviteCancelled]
    ));
    assert_eq!(relay.active_calls(), 1);

    relay.handle_message(
        a.connection,
        ClientMessage::End {
            to_connection: Some(b2.connection),
        },
    );

    assert!(matches!(
        b2.drain().as_slice(),
        [ServerMessage::CallEnded { .. }]
    ));
    assert!(b1.drain().is_empty());
    assert_eq!(relay.active_calls(), 0);
}
