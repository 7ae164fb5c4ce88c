//! RTCPeerConnection-backed peer session
//!
//! The shipped [`PeerSession`] implementation, built on the webrtc crate with
//! STUN-assisted candidate discovery. Local tracks are
//! `TrackLocalStaticSample` wrappers; the embedder pumps samples into them and
//! consults the per-track enabled flag while doing so.

use crate::client::media::{MediaDevices, MediaError, MediaTrack, TrackKind};
use crate::client::session::{PeerSession, SessionError, SessionEvent};
use crate::types::{CameraFacing, CandidateInit, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Default public STUN servers, matching common client configurations
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A local capture track backed by `TrackLocalStaticSample`.
///
/// `stop` and `set_enabled` flip flags the sample pump observes; the RTP
/// plumbing itself stays attached so substitution never renegotiates.
pub struct RtcMediaTrack {
    track: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl RtcMediaTrack {
    fn new(kind: TrackKind, id: String, stream_id: String) -> Self {
        let codec = match kind {
            TrackKind::MicrophoneAudio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: vec![],
            },
            TrackKind::CameraVideo | TrackKind::ScreenVideo => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: vec![],
            },
        };
        Self {
            track: Arc::new(TrackLocalStaticSample::new(codec, id, stream_id)),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// The underlying sample track, for the embedder's sample pump
    #[must_use]
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Whether `stop` has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for RtcMediaTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Capture source producing [`RtcMediaTrack`]s.
///
/// Device selection and sample production belong to the platform embedder;
/// this source mints the track objects the session can attach.
#[derive(Default)]
pub struct RtcMediaDevices {
    counter: AtomicUsize,
}

impl RtcMediaDevices {
    /// Create a new source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl MediaDevices for RtcMediaDevices {
    async fn open_camera(&self, facing: CameraFacing) -> Result<Arc<dyn MediaTrack>, MediaError> {
        let id = self.next_id("camera");
        tracing::debug!(%id, ?facing, "Opening camera track");
        Ok(Arc::new(RtcMediaTrack::new(
            TrackKind::CameraVideo,
            id,
            "camera".to_string(),
        )))
    }

    async fn open_microphone(&self) -> Result<Arc<dyn MediaTrack>, MediaError> {
        let id = self.next_id("mic");
        tracing::debug!(%id, "Opening microphone track");
        Ok(Arc::new(RtcMediaTrack::new(
            TrackKind::MicrophoneAudio,
            id,
            "mic".to_string(),
        )))
    }

    async fn open_display(&self) -> Result<Arc<dyn MediaTrack>, MediaError> {
        let id = self.next_id("screen");
        tracing::debug!(%id, "Opening display capture track");
        Ok(Arc::new(RtcMediaTrack::new(
            TrackKind::ScreenVideo,
            id,
            "screen".to_string(),
        )))
    }
}

/// [`PeerSession`] over an `RTCPeerConnection`.
pub struct RtcPeerSession {
    pc: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl RtcPeerSession {
    /// Build a peer connection with the given STUN servers and wire its
    /// candidate and connection-state callbacks into `events`.
    pub async fn new(
        stun_servers: Vec<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: stun_servers,
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            APIBuilder::new()
                .build()
                .new_peer_connection(config)
                .await
                .map_err(|e| SessionError::Description(e.to_string()))?,
        );

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_events.send(SessionEvent::CandidateDiscovered(
                            CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            },
                        ));
                    }
                    Err(err) => {
                        tracing::debug!(%err, "Skipping unencodable candidate");
                    }
                }
            })
        }));

        let state_events = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let state_events = state_events.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = state_events.send(SessionEvent::MediaFlowing);
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        let _ = state_events
                            .send(SessionEvent::TransportFailed(format!("{state:?}")));
                    }
                    _ => {}
                }
            })
        }));

        Ok(Self {
            pc,
            video_sender: Mutex::new(None),
        })
    }

    /// Same as [`RtcPeerSession::new`] with [`DEFAULT_STUN_SERVERS`]
    pub async fn with_default_stun(
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        Self::new(
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            events,
        )
        .await
    }

    fn downcast(track: &dyn MediaTrack) -> Result<&RtcMediaTrack, SessionError> {
        track
            .as_any()
            .downcast_ref::<RtcMediaTrack>()
            .ok_or_else(|| SessionError::Track("track is not an RtcMediaTrack".to_string()))
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Description(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| SessionError::Description(e.to_string()))?;
        Ok(SessionDescription::new(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| SessionError::Description(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| SessionError::Description(e.to_string()))?;
        Ok(SessionDescription::new(answer.sdp))
    }

    async fn apply_remote_offer(&self, offer: SessionDescription) -> Result<(), SessionError> {
        let desc = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| SessionError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| SessionError::Description(e.to_string()))
    }

    async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<(), SessionError> {
        let desc = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| SessionError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| SessionError::Description(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), SessionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| SessionError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), SessionError> {
        let rtc_track = Self::downcast(track.as_ref())?;
        let local: Arc<dyn TrackLocal + Send + Sync> = rtc_track.sample_track();
        let sender = self
            .pc
            .add_track(local)
            .await
            .map_err(|e| SessionError::Track(e.to_string()))?;

        if matches!(track.kind(), TrackKind::CameraVideo | TrackKind::ScreenVideo) {
            *self.video_sender.lock().await = Some(sender);
        }
        Ok(())
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
    ) -> Result<(), SessionError> {
        let sender = self.video_sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            return Err(SessionError::Track("no outgoing video slot".to_string()));
        };
        let replacement: Option<Arc<dyn TrackLocal + Send + Sync>> = match track {
            Some(track) => Some(Self::downcast(track.as_ref())?.sample_track()),
            None => None,
        };
        sender
            .replace_track(replacement)
            .await
            .map_err(|e| SessionError::Track(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.pc.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_track_flags() {
        let devices = RtcMediaDevices::new();
        let track = devices.open_camera(CameraFacing::Front).await.unwrap();
        assert_eq!(track.kind(), TrackKind::CameraVideo);
        assert!(track.is_enabled());
        track.set_enabled(false);
        assert!(!track.is_enabled());
        track.stop();
        track.stop();
    }

    #[tokio::test]
    async fn test_track_ids_are_distinct() {
        let devices = RtcMediaDevices::new();
        let a = devices.open_microphone().await.unwrap();
        let b = devices.open_microphone().await.unwrap();
        let a = a.as_any().downcast_ref::<RtcMediaTrack>().unwrap();
        let b = b.as_any().downcast_ref::<RtcMediaTrack>().unwrap();
        assert_ne!(a.sample_track().id(), b.sample_track().id());
    }

    #[tokio::test]
    async fn test_session_offer_contains_sdp() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = RtcPeerSession::with_default_stun(tx).await.unwrap();
        let devices = RtcMediaDevices::new();
        let mic = devices.open_microphone().await.unwrap();
        session.add_track(mic).await.unwrap();
        let offer = session.create_offer().await.unwrap();
        assert!(offer.sdp.contains("v=0"));
        session.close().await;
    }
}
