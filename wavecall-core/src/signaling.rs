//! Signaling wire protocol
//!
//! One JSON-encoded message per frame over a persistent bidirectional channel,
//! one channel per device connection. The relay routes on addressing fields
//! only and never inspects session descriptions or candidates.

use crate::identity::UserIdentity;
use crate::types::{CallTarget, CandidateInit, ConnectionId, MediaKind, PresenceEntry, SessionDescription};
use serde::{Deserialize, Serialize};

/// Messages a client sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", bound = "I: UserIdentity")]
pub enum ClientMessage<I: UserIdentity> {
    /// Bind this connection to a user identity
    Register {
        /// The identity this device belongs to
        identity: I,
    },

    /// Start a call: ring every connection of the target
    Invite {
        /// Caller identity
        from: I,
        /// Who is being called
        to: CallTarget<I>,
        /// Session offer
        offer: SessionDescription,
        /// Audio-only or video call
        media: MediaKind,
    },

    /// Answer a ringing invite, addressed to the caller's specific connection
    Accept {
        /// Accepting identity
        from: I,
        /// The connection that sent the invite
        to_connection: ConnectionId,
        /// Session answer
        answer: SessionDescription,
    },

    /// Forward a network path candidate to a specific connection
    Candidate {
        /// Target connection
        to_connection: ConnectionId,
        /// The candidate payload
        candidate: CandidateInit,
    },

    /// Hang up or decline. `to_connection` is absent when the sender does not
    /// yet know its peer (a caller hanging up while still ringing).
    End {
        /// Target connection, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_connection: Option<ConnectionId>,
    },
}

/// Messages the relay sends to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", bound = "I: UserIdentity")]
pub enum ServerMessage<I: UserIdentity> {
    /// One-time dump of all contacts' current presence, pushed on register
    PresenceSnapshot {
        /// Current state of every contact
        contacts: Vec<PresenceEntry<I>>,
    },

    /// A contact crossed the online/offline boundary
    PresenceUpdate {
        /// The contact whose state changed
        identity: I,
        /// New binary state
        online: bool,
    },

    /// An incoming call is ringing this device
    Invite {
        /// Caller identity
        from: I,
        /// The caller's specific connection; answers go back to it
        from_connection: ConnectionId,
        /// Session offer
        offer: SessionDescription,
        /// Audio-only or video call
        media: MediaKind,
    },

    /// The callee answered; sent only to the connection that invited
    Accept {
        /// Accepting identity
        from: I,
        /// The connection that accepted, now the pinned peer
        from_connection: ConnectionId,
        /// Session answer
        answer: SessionDescription,
    },

    /// A network path candidate from the paired peer
    Candidate {
        /// The sender's connection
        from_connection: ConnectionId,
        /// The candidate payload
        candidate: CandidateInit,
    },

    /// The call is over: peer hung up, declined, or dropped
    CallEnded {
        /// The connection that ended it, when the relay knows
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_connection: Option<ConnectionId>,
    },

    /// Stop ringing: another device of the same identity took the call, or the
    /// caller withdrew the invite
    InviteCancelled,

    /// The invite could not be delivered
    Unreachable {
        /// Human-readable reason
        reason: String,
    },
}

impl<I: UserIdentity> ClientMessage<I> {
    /// Message name for tracing
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Invite { .. } => "invite",
            Self::Accept { .. } => "accept",
            Self::Candidate { .. } => "candidate",
            Self::End { .. } => "end",
        }
    }
}

impl<I: UserIdentity> ServerMessage<I> {
    /// Message name for tracing
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PresenceSnapshot { .. } => "presence-snapshot",
            Self::PresenceUpdate { .. } => "presence-update",
            Self::Invite { .. } => "invite",
            Self::Accept { .. } => "accept",
            Self::Candidate { .. } => "candidate",
            Self::CallEnded { .. } => "call-ended",
            Self::InviteCancelled => "invite-cancelled",
            Self::Unreachable { .. } => "unreachable",
        }
    }
}
