//! Media capture and live track substitution
//!
//! Owns the device capture handles for one call and performs in-place
//! substitution of the outgoing video track (camera flip, screen-share
//! takeover, enable/disable) without touching the negotiated session.

use crate::client::session::{PeerSession, SessionError};
use crate::types::{CameraFacing, MediaKind};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Media acquisition and substitution failures
#[derive(Error, Debug)]
pub enum MediaError {
    /// The user or platform denied access to a capture device
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    /// The requested device does not exist or is in use
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Camera operations are refused while a screen share is live
    #[error("screen share is active")]
    ScreenShareActive,

    /// The session rejected the track substitution
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Logical role of a capture track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Camera video
    CameraVideo,
    /// Microphone audio
    MicrophoneAudio,
    /// Display capture video
    ScreenVideo,
}

/// One live capture handle.
///
/// `stop` releases the underlying device and must be idempotent; `set_enabled`
/// only flips whether frames/samples are emitted, leaving the device open.
pub trait MediaTrack: Send + Sync {
    /// Logical role of this track
    fn kind(&self) -> TrackKind;

    /// Flip whether the track emits media. The remote side sees a frozen or
    /// blank frame; no renegotiation happens.
    fn set_enabled(&self, enabled: bool);

    /// Whether the track currently emits media
    fn is_enabled(&self) -> bool;

    /// Stop the capture and release the device. Idempotent.
    fn stop(&self);

    /// Downcast support for engine-specific session implementations
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Capture device access, supplied by the platform embedder.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the camera with the given facing
    async fn open_camera(&self, facing: CameraFacing) -> Result<Arc<dyn MediaTrack>, MediaError>;

    /// Open the microphone
    async fn open_microphone(&self) -> Result<Arc<dyn MediaTrack>, MediaError>;

    /// Open a display capture. The returned track's `stop` is also invoked by
    /// the pipeline when the platform reports the capture ended on its own.
    async fn open_display(&self) -> Result<Arc<dyn MediaTrack>, MediaError>;
}

/// Per-call media state: which captures are live, which camera is parked
/// behind a screen share, and the current enabled flags.
pub struct MediaPipeline {
    devices: Arc<dyn MediaDevices>,
    microphone: Option<Arc<dyn MediaTrack>>,
    camera: Option<Arc<dyn MediaTrack>>,
    screen: Option<Arc<dyn MediaTrack>>,
    parked_camera: Option<Arc<dyn MediaTrack>>,
    facing: CameraFacing,
    video_enabled: bool,
    muted: bool,
}

impl MediaPipeline {
    /// Create an idle pipeline over the given device source
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            microphone: None,
            camera: None,
            screen: None,
            parked_camera: None,
            facing: CameraFacing::Front,
            video_enabled: false,
            muted: false,
        }
    }

    /// Acquire capture tracks for a call: microphone always, camera for video
    /// calls. Any previously held capture of the same role is stopped first.
    /// On camera failure the microphone acquired by this call is released
    /// again; no partially held devices survive an error.
    pub async fn acquire(
        &mut self,
        kind: MediaKind,
        facing: CameraFacing,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, MediaError> {
        let microphone = self.devices.open_microphone().await?;
        microphone.set_enabled(!self.muted);

        let camera = if kind.has_video() {
            match self.devices.open_camera(facing).await {
                Ok(camera) => Some(camera),
                Err(err) => {
                    microphone.stop();
                    return Err(err);
                }
            }
        } else {
            None
        };

        if let Some(old) = self.microphone.replace(microphone.clone()) {
            old.stop();
        }
        let mut tracks: Vec<Arc<dyn MediaTrack>> = vec![microphone];

        if let Some(camera) = camera {
            camera.set_enabled(true);
            if let Some(old) = self.camera.replace(camera.clone()) {
                old.stop();
            }
            self.facing = facing;
            self.video_enabled = true;
            tracks.push(camera);
        }

        tracing::debug!(?kind, ?facing, "Acquired local media");
        Ok(tracks)
    }

    /// Switch the camera to the other facing and substitute the new track
    /// into the outgoing session in place. The superseded track is stopped.
    /// Refused while a screen share holds the video slot.
    pub async fn switch_camera(
        &mut self,
        session: &dyn PeerSession,
        facing: CameraFacing,
    ) -> Result<(), MediaError> {
        if self.screen.is_some() {
            return Err(MediaError::ScreenShareActive);
        }
        let replacement = self.devices.open_camera(facing).await?;
        replacement.set_enabled(self.video_enabled);
        session.replace_video_track(Some(replacement.clone())).await?;

        if let Some(old) = self.camera.replace(replacement) {
            old.stop();
        }
        self.facing = facing;
        tracing::debug!(?facing, "Camera switched");
        Ok(())
    }

    /// Substitute a display capture for the outgoing camera track. The camera
    /// is parked, not stopped, so `stop_screen_share` can restore it.
    /// A no-op when a share is already running.
    pub async fn start_screen_share(
        &mut self,
        session: &dyn PeerSession,
    ) -> Result<(), MediaError> {
        if self.screen.is_some() {
            return Ok(());
        }
        let screen = self.devices.open_display().await?;
        screen.set_enabled(true);
        session.replace_video_track(Some(screen.clone())).await?;

        self.parked_camera = self.camera.take();
        self.screen = Some(screen);
        tracing::info!("Screen share started");
        Ok(())
    }

    /// Stop the screen share and restore the parked camera track.
    ///
    /// This is also the reentry point for the platform's own "stop sharing"
    /// control: the share slot is emptied before any await, so a concurrent or
    /// repeated stop finds nothing to do and returns immediately.
    pub async fn stop_screen_share(&mut self, session: &dyn PeerSession) -> Result<(), MediaError> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };
        screen.stop();

        match self.parked_camera.take() {
            Some(camera) => {
                camera.set_enabled(self.video_enabled);
                session.replace_video_track(Some(camera.clone())).await?;
                self.camera = Some(camera);
            }
            None => {
                session.replace_video_track(None).await?;
            }
        }
        tracing::info!("Screen share stopped");
        Ok(())
    }

    /// Flip whether outgoing video is emitted. The capture device stays open;
    /// the remote side sees a frozen/blank frame without any renegotiation.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
        if let Some(track) = self.screen.as_ref().or(self.camera.as_ref()) {
            track.set_enabled(enabled);
        }
    }

    /// Flip whether the microphone emits audio
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(microphone) = &self.microphone {
            microphone.set_enabled(!muted);
        }
    }

    /// Whether a screen share currently holds the video slot
    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Current camera facing
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// Whether outgoing video is enabled
    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Whether the microphone is muted
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Stop every live capture. Idempotent; the call teardown path and the
    /// error paths may both reach it.
    pub fn release_all(&mut self) {
        for track in [
            self.microphone.take(),
            self.camera.take(),
            self.screen.take(),
            self.parked_camera.take(),
        ]
        .into_iter()
        .flatten()
        {
            track.stop();
        }
    }
}
