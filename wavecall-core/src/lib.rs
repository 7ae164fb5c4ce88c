//! Wavecall - call signaling and session state for two-party calls
//!
//! This library carries both halves of a real-time calling system's control
//! plane:
//!
//! - **Relay** (server side): maps user identities to their live device
//!   connections, fans call invitations out to every device, pins the accepted
//!   connection pair, and guarantees symmetric, idempotent cleanup however a
//!   call ends.
//! - **Client engine**: a per-call negotiation controller driving offer/answer
//!   exchange, candidate buffering, and in-call media substitution (camera
//!   flip, screen-share takeover, video/mute toggles) without renegotiation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use wavecall_core::{ClientMessage, Relay, NoContacts, UserId};
//!
//! let relay = Relay::<UserId>::new(Arc::new(NoContacts));
//! let (tx, _rx) = mpsc::unbounded_channel();
//! let connection = relay.connect(tx);
//! relay.handle_message(
//!     connection,
//!     ClientMessage::Register {
//!         identity: UserId::new("alice"),
//!     },
//! );
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// User identity abstraction
pub mod identity;

/// Shared types and data structures
pub mod types;

/// Signaling wire protocol
pub mod signaling;

/// Server-side signaling relay
pub mod relay;

/// Client-side call engine
pub mod client;

// Re-export main types at crate root
pub use client::{
    CallCues, CallPhase, CallRole, CallSession, MediaDevices, MediaError, MediaPipeline,
    MediaTrack, NegotiationError, NoCues, PeerSession, SessionError, SessionEvent,
    SignalingOutbound, TrackKind,
};
#[cfg(feature = "webrtc-session")]
pub use client::{RtcMediaDevices, RtcMediaTrack, RtcPeerSession, DEFAULT_STUN_SERVERS};
pub use identity::{UserId, UserIdentity};
pub use relay::{
    ActiveCallTracker, ConnectionRegistry, ContactDirectory, NoContacts, OutboundSender,
    PinError, PresenceEvent, PresenceNotifier, Relay, Unregistered,
};
pub use signaling::{ClientMessage, ServerMessage};
pub use types::{
    CallTarget, CameraFacing, CandidateInit, ConnectionId, MediaKind, PresenceEntry,
    SessionDescription,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{CallPhase, CallRole, CallSession, MediaPipeline, SessionEvent};
    pub use crate::identity::{UserId, UserIdentity};
    pub use crate::relay::{ContactDirectory, Relay};
    pub use crate::signaling::{ClientMessage, ServerMessage};
    pub use crate::types::{
        CallTarget, CameraFacing, CandidateInit, ConnectionId, MediaKind, SessionDescription,
    };
}
