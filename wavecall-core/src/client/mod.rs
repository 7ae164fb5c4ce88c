//! Client-side call engine
//!
//! One [`negotiation::CallSession`] per call attempt, driving a
//! [`session::PeerSession`] and a [`media::MediaPipeline`].

pub mod media;
pub mod negotiation;
pub mod session;

#[cfg(feature = "webrtc-session")]
pub mod webrtc_session;

pub use media::{MediaDevices, MediaError, MediaPipeline, MediaTrack, TrackKind};
pub use negotiation::{
    CallCues, CallPhase, CallRole, CallSession, NegotiationError, NoCues, SignalingOutbound,
};
pub use session::{PeerSession, SessionError, SessionEvent};

#[cfg(feature = "webrtc-session")]
pub use webrtc_session::{RtcMediaDevices, RtcMediaTrack, RtcPeerSession, DEFAULT_STUN_SERVERS};
