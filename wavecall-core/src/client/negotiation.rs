//! Call negotiation state machine
//!
//! One [`CallSession`] drives one call attempt on one device: it owns the
//! peer session, the media pipeline, and the candidate queues, and guarantees
//! that local media and the session object are released exactly once no
//! matter which path ends the call: local hangup, remote end, ring
//! cancellation, transport failure, or media acquisition failure.

use crate::client::media::{MediaDevices, MediaError, MediaPipeline};
use crate::client::session::{PeerSession, SessionError, SessionEvent};
use crate::identity::UserIdentity;
use crate::signaling::ClientMessage;
use crate::types::{
    CallTarget, CandidateInit, CameraFacing, ConnectionId, MediaKind, SessionDescription,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Negotiation failures
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// A call is already in progress on this device
    #[error("a call is already in progress")]
    Busy,

    /// The operation is not valid in the current phase
    #[error("operation invalid in phase {0:?}")]
    InvalidPhase(CallPhase),

    /// Local media could not be acquired
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The peer session failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The signaling channel rejected a send
    #[error("signaling send failed: {0}")]
    Signaling(String),
}

/// Lifecycle phase of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No call activity yet
    Idle,
    /// Outgoing invite sent, waiting for an accept
    Dialing,
    /// Incoming invite received, waiting for the local user
    Ringing,
    /// Descriptions exchanged, transport still converging
    Negotiating,
    /// Media is flowing
    Connected,
    /// Terminal: resources released
    Ended,
}

/// Which side of the call this device is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// This device sent the invite
    Caller,
    /// This device was invited
    Callee,
}

/// Side-effect hooks fired at lifecycle transitions.
///
/// Ring tones, click sounds and history writes live behind this trait, out of
/// the protocol logic. All hooks default to no-ops.
pub trait CallCues: Send + Sync {
    /// An outgoing call started ringing the remote side
    fn on_dialing(&self) {}
    /// An incoming call started ringing this device
    fn on_ringing(&self) {}
    /// The call reached its terminal phase
    fn on_ended(&self) {}
}

/// The default cue hook: silence
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCues;

impl CallCues for NoCues {}

/// Outbound half of the signaling channel, as seen by the controller.
#[async_trait]
pub trait SignalingOutbound<I: UserIdentity>: Send + Sync {
    /// Send one message to the relay. Failures end the current call attempt.
    async fn send(&self, message: ClientMessage<I>) -> anyhow::Result<()>;
}

/// Client-side negotiation controller for a single call.
///
/// Create one per call attempt; after `Ended` the instance is spent and a
/// fresh invite needs a fresh `CallSession`.
pub struct CallSession<I: UserIdentity> {
    local_identity: I,
    session: Arc<dyn PeerSession>,
    media: MediaPipeline,
    outbound: Arc<dyn SignalingOutbound<I>>,
    cues: Arc<dyn CallCues>,
    phase: CallPhase,
    role: Option<CallRole>,
    remote_identity: Option<I>,
    remote_connection: Option<ConnectionId>,
    media_kind: Option<MediaKind>,
    remote_description_applied: bool,
    pending_remote_candidates: VecDeque<CandidateInit>,
    pending_local_candidates: VecDeque<CandidateInit>,
}

impl<I: UserIdentity> CallSession<I> {
    /// Create an idle controller.
    ///
    /// `session` is the not-yet-negotiated peer session; its events must be
    /// fed back through [`CallSession::handle_session_event`].
    pub fn new(
        local_identity: I,
        session: Arc<dyn PeerSession>,
        devices: Arc<dyn MediaDevices>,
        outbound: Arc<dyn SignalingOutbound<I>>,
        cues: Arc<dyn CallCues>,
    ) -> Self {
        Self {
            local_identity,
            session,
            media: MediaPipeline::new(devices),
            outbound,
            cues,
            phase: CallPhase::Idle,
            role: None,
            remote_identity: None,
            remote_connection: None,
            media_kind: None,
            remote_description_applied: false,
            pending_remote_candidates: VecDeque::new(),
            pending_local_candidates: VecDeque::new(),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Which side of the call this device is, once a call started
    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    /// The paired remote connection, once known
    pub fn remote_connection(&self) -> Option<ConnectionId> {
        self.remote_connection
    }

    /// The remote identity, once known
    pub fn remote_identity(&self) -> Option<&I> {
        self.remote_identity.as_ref()
    }

    /// The media kind of the current call attempt
    pub fn media_kind(&self) -> Option<MediaKind> {
        self.media_kind
    }

    /// Media pipeline state (facing, mute, share flags)
    pub fn media(&self) -> &MediaPipeline {
        &self.media
    }

    /// Start an outgoing call: acquire local media, create and send the offer.
    ///
    /// Media failure releases anything partially acquired and leaves the
    /// controller `Ended`; nothing is retried.
    #[tracing::instrument(skip(self), fields(callee = %callee))]
    pub async fn start_call(&mut self, callee: I, media: MediaKind) -> Result<(), NegotiationError> {
        if self.phase != CallPhase::Idle {
            return Err(NegotiationError::InvalidPhase(self.phase));
        }
        self.role = Some(CallRole::Caller);
        self.remote_identity = Some(callee.clone());
        self.media_kind = Some(media);
        self.phase = CallPhase::Dialing;
        self.cues.on_dialing();

        if let Err(err) = self.setup_local_media(media).await {
            self.teardown(false).await;
            return Err(err);
        }

        let offer = match self.session.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                self.teardown(false).await;
                return Err(err.into());
            }
        };

        self.send_or_end(ClientMessage::Invite {
            from: self.local_identity.clone(),
            to: CallTarget::Individual { id: callee },
            offer,
            media,
        })
        .await
    }

    /// Handle an incoming invite.
    ///
    /// Only valid while idle; a device already in a call answers the new
    /// invite's originating connection with an `end` and reports `Busy`
    /// without disturbing the current call. Local media is acquired eagerly
    /// so the eventual answer carries this device's capabilities.
    #[tracing::instrument(skip(self, offer), fields(caller = %from))]
    pub async fn handle_invite(
        &mut self,
        from: I,
        from_connection: ConnectionId,
        offer: SessionDescription,
        media: MediaKind,
    ) -> Result<(), NegotiationError> {
        if self.phase != CallPhase::Idle {
            tracing::debug!("Refusing invite while busy");
            let _ = self
                .outbound
                .send(ClientMessage::End {
                    to_connection: Some(from_connection),
                })
                .await;
            return Err(NegotiationError::Busy);
        }
        self.role = Some(CallRole::Callee);
        self.remote_identity = Some(from);
        self.remote_connection = Some(from_connection);
        self.media_kind = Some(media);
        self.phase = CallPhase::Ringing;
        self.cues.on_ringing();

        if let Err(err) = self.setup_local_media(media).await {
            self.teardown(true).await;
            return Err(err);
        }

        if let Err(err) = self.session.apply_remote_offer(offer).await {
            self.teardown(true).await;
            return Err(err.into());
        }
        self.remote_description_applied = true;
        self.flush_remote_candidates().await;
        Ok(())
    }

    /// Answer the ringing call: create and send the answer.
    #[tracing::instrument(skip(self))]
    pub async fn accept(&mut self) -> Result<(), NegotiationError> {
        if self.phase != CallPhase::Ringing {
            return Err(NegotiationError::InvalidPhase(self.phase));
        }
        let Some(remote) = self.remote_connection else {
            return Err(NegotiationError::InvalidPhase(self.phase));
        };

        let answer = match self.session.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                self.teardown(true).await;
                return Err(err.into());
            }
        };

        self.phase = CallPhase::Negotiating;
        self.send_or_end(ClientMessage::Accept {
            from: self.local_identity.clone(),
            to_connection: remote,
            answer,
        })
        .await?;
        self.flush_local_candidates().await;
        Ok(())
    }

    /// Handle the routed accept (caller side): pin the remote connection,
    /// apply the answer, flush both candidate queues.
    #[tracing::instrument(skip(self, answer))]
    pub async fn handle_accept(
        &mut self,
        from_connection: ConnectionId,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.phase != CallPhase::Dialing {
            tracing::debug!(phase = ?self.phase, "Ignoring accept outside Dialing");
            return Ok(());
        }
        self.remote_connection = Some(from_connection);

        if let Err(err) = self.session.apply_remote_answer(answer).await {
            self.teardown(true).await;
            return Err(err.into());
        }
        self.remote_description_applied = true;
        self.phase = CallPhase::Negotiating;
        self.flush_remote_candidates().await;
        self.flush_local_candidates().await;
        Ok(())
    }

    /// Handle a routed remote candidate.
    ///
    /// Candidates arriving before the remote description are buffered and
    /// applied in receipt order right after the description lands. A candidate
    /// the session rejects is logged and discarded, never fatal.
    pub async fn handle_candidate(&mut self, candidate: CandidateInit) {
        match self.phase {
            CallPhase::Idle | CallPhase::Ended => {
                tracing::debug!("Discarding candidate outside an active call");
            }
            _ if self.remote_description_applied => {
                if let Err(err) = self.session.add_remote_candidate(candidate).await {
                    tracing::debug!(%err, "Discarding rejected candidate");
                }
            }
            _ => {
                self.pending_remote_candidates.push_back(candidate);
            }
        }
    }

    /// Feed back an event from the peer session.
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::CandidateDiscovered(candidate) => {
                self.emit_local_candidate(candidate).await;
            }
            SessionEvent::MediaFlowing => {
                if self.phase == CallPhase::Negotiating {
                    tracing::info!("Call connected");
                    self.phase = CallPhase::Connected;
                } else {
                    tracing::debug!(phase = ?self.phase, "Media flowing outside Negotiating");
                }
            }
            SessionEvent::TransportFailed(reason) => {
                if self.phase != CallPhase::Ended {
                    tracing::warn!(%reason, "Transport failed, ending call");
                    self.teardown(true).await;
                }
            }
        }
    }

    /// Local hangup or decline: notify the peer when one was reached, then
    /// release everything. Safe to call in any phase, any number of times.
    #[tracing::instrument(skip(self))]
    pub async fn hang_up(&mut self) {
        self.teardown(true).await;
    }

    /// The peer ended the call (routed `call-ended`).
    pub async fn handle_remote_end(&mut self) {
        self.teardown(false).await;
    }

    /// Another device of this identity took the call, or the caller withdrew
    /// the invite: stop ringing without notifying anyone.
    pub async fn handle_invite_cancelled(&mut self) {
        if self.phase == CallPhase::Ringing {
            self.teardown(false).await;
        } else {
            tracing::debug!(phase = ?self.phase, "Ignoring ring cancellation");
        }
    }

    /// The relay reported the invite undeliverable. The attempt is over;
    /// nothing is retried.
    pub async fn handle_unreachable(&mut self, reason: &str) {
        if self.phase != CallPhase::Ended {
            tracing::info!(%reason, "Call target unreachable");
            self.teardown(false).await;
        }
    }

    /// Switch the camera facing mid-call; the session keeps its negotiated
    /// state and exactly one outgoing video track is swapped.
    pub async fn switch_camera(&mut self, facing: CameraFacing) -> Result<(), NegotiationError> {
        self.ensure_in_call()?;
        self.media.switch_camera(self.session.as_ref(), facing).await?;
        Ok(())
    }

    /// Replace the outgoing camera with a display capture
    pub async fn start_screen_share(&mut self) -> Result<(), NegotiationError> {
        self.ensure_in_call()?;
        self.media.start_screen_share(self.session.as_ref()).await?;
        Ok(())
    }

    /// Stop sharing and restore the camera
    pub async fn stop_screen_share(&mut self) -> Result<(), NegotiationError> {
        self.ensure_in_call()?;
        self.media.stop_screen_share(self.session.as_ref()).await?;
        Ok(())
    }

    /// The platform reported the display capture ended on its own (the
    /// operating system's "stop sharing" control). Converges on the same
    /// path as a manual stop and cannot double-fire.
    pub async fn handle_screen_share_ended(&mut self) {
        if self.phase == CallPhase::Ended {
            return;
        }
        if let Err(err) = self.media.stop_screen_share(self.session.as_ref()).await {
            tracing::warn!(%err, "Failed to restore camera after share ended");
        }
    }

    /// Flip outgoing video without stopping the capture device
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.media.set_video_enabled(enabled);
    }

    /// Flip the microphone
    pub fn set_muted(&mut self, muted: bool) {
        self.media.set_muted(muted);
    }

    async fn setup_local_media(&mut self, media: MediaKind) -> Result<(), NegotiationError> {
        let tracks = self.media.acquire(media, CameraFacing::Front).await?;
        for track in tracks {
            self.session.add_track(track).await?;
        }
        Ok(())
    }

    async fn emit_local_candidate(&mut self, candidate: CandidateInit) {
        if self.phase == CallPhase::Ended {
            return;
        }
        match self.remote_connection {
            Some(remote) => {
                let message = ClientMessage::Candidate {
                    to_connection: remote,
                    candidate,
                };
                if let Err(err) = self.outbound.send(message).await {
                    tracing::debug!(%err, "Failed to push local candidate");
                }
            }
            // The caller learns its peer connection only from the accept;
            // candidates discovered before that are flushed on pinning.
            None => self.pending_local_candidates.push_back(candidate),
        }
    }

    async fn flush_remote_candidates(&mut self) {
        while let Some(candidate) = self.pending_remote_candidates.pop_front() {
            if let Err(err) = self.session.add_remote_candidate(candidate).await {
                tracing::debug!(%err, "Discarding buffered candidate");
            }
        }
    }

    async fn flush_local_candidates(&mut self) {
        let Some(remote) = self.remote_connection else {
            return;
        };
        while let Some(candidate) = self.pending_local_candidates.pop_front() {
            let message = ClientMessage::Candidate {
                to_connection: remote,
                candidate,
            };
            if let Err(err) = self.outbound.send(message).await {
                tracing::debug!(%err, "Failed to flush local candidate");
            }
        }
    }

    async fn send_or_end(&mut self, message: ClientMessage<I>) -> Result<(), NegotiationError> {
        if let Err(err) = self.outbound.send(message).await {
            let reason = err.to_string();
            self.teardown(false).await;
            return Err(NegotiationError::Signaling(reason));
        }
        Ok(())
    }

    fn ensure_in_call(&self) -> Result<(), NegotiationError> {
        match self.phase {
            CallPhase::Negotiating | CallPhase::Connected => Ok(()),
            phase => Err(NegotiationError::InvalidPhase(phase)),
        }
    }

    /// The single teardown path. Releases local media and closes the session
    /// exactly once; a second entry finds the terminal phase and returns.
    async fn teardown(&mut self, notify_peer: bool) {
        if self.phase == CallPhase::Ended {
            return;
        }
        let was_idle = self.phase == CallPhase::Idle;
        self.phase = CallPhase::Ended;

        if notify_peer {
            let _ = self
                .outbound
                .send(ClientMessage::End {
                    to_connection: self.remote_connection,
                })
                .await;
        }

        self.media.release_all();
        self.session.close().await;
        self.pending_remote_candidates.clear();
        self.pending_local_candidates.clear();

        if !was_idle {
            self.cues.on_ended();
        }
        tracing::info!("Call ended");
    }
}
