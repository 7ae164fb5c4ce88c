//! Peer session abstraction
//!
//! The seam between the negotiation state machine and the actual RTC engine.
//! Implement this for your transport; `RtcPeerSession` (feature
//! `webrtc-session`) is the shipped implementation.

use crate::client::media::MediaTrack;
use crate::types::{CandidateInit, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Session-level failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// Description could not be created or applied
    #[error("description error: {0}")]
    Description(String),

    /// Candidate could not be applied
    #[error("candidate error: {0}")]
    Candidate(String),

    /// Track could not be attached or substituted
    #[error("track error: {0}")]
    Track(String),

    /// The session is closed
    #[error("session is closed")]
    Closed,
}

/// Events a session pushes back at the negotiation controller.
///
/// Delivered over the event channel handed to the session at construction;
/// the controller consumes them via
/// [`CallSession::handle_session_event`](crate::client::negotiation::CallSession::handle_session_event).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A local network path candidate was discovered. Emission continues for
    /// the life of the call; paths can change after media starts flowing.
    CandidateDiscovered(CandidateInit),
    /// Media is flowing; the call is connected
    MediaFlowing,
    /// The transport failed and the call cannot continue
    TransportFailed(String),
}

/// One peer-to-peer media session.
///
/// `create_offer`/`create_answer` install the produced description as the
/// local description before returning it, mirroring how the underlying
/// engines want the two steps paired.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    /// Create an answer and install it as the local description
    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    /// Apply the remote side's offer
    async fn apply_remote_offer(&self, offer: SessionDescription) -> Result<(), SessionError>;

    /// Apply the remote side's answer
    async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<(), SessionError>;

    /// Apply a remote network path candidate. Only valid once a remote
    /// description has been applied; the controller buffers until then.
    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), SessionError>;

    /// Attach an outgoing local track
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), SessionError>;

    /// Substitute the outgoing video track in place, without renegotiation.
    /// `None` clears the slot.
    async fn replace_video_track(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
    ) -> Result<(), SessionError>;

    /// Close the session and release the underlying connection object.
    /// Must be idempotent.
    async fn close(&self);
}
