//! Shared types and data structures

use crate::identity::UserIdentity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned handle for one live signaling channel from one device.
///
/// Minted by the relay when a channel opens and dead once it closes. A user
/// connected from several devices holds one `ConnectionId` per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Mint a fresh connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media a call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone only
    Audio,
    /// Camera and microphone
    Video,
}

impl MediaKind {
    /// Whether this call kind carries a video track
    pub fn has_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// Which way the device camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// User-facing camera
    Front,
    /// World-facing camera
    Rear,
}

impl CameraFacing {
    /// The opposite facing
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Rear,
            Self::Rear => Self::Front,
        }
    }
}

/// An SDP session description, opaque to the relay.
///
/// The relay forwards descriptions without inspecting them; whether the
/// payload is an offer or an answer is carried by the message that wraps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Raw SDP content
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap raw SDP
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// A discovered network path candidate, exchanged to establish the media
/// transport. Opaque to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    /// Candidate string
    pub candidate: String,
    /// SDP media id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// What an invite is aimed at.
///
/// Group calls are not supported by this core: the variant exists so the
/// routing boundary can refuse them explicitly instead of mishandling them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", bound = "I: UserIdentity")]
pub enum CallTarget<I: UserIdentity> {
    /// A single user identity
    Individual {
        /// The callee
        id: I,
    },
    /// A group; always rejected at the router entry point
    Group {
        /// Group id as issued by the directory collaborator
        id: String,
    },
}

/// One contact's presence, as carried by the snapshot push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "I: UserIdentity")]
pub struct PresenceEntry<I: UserIdentity> {
    /// Contact identity
    pub identity: I,
    /// Whether the contact has at least one live connection
    pub online: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::UserId;

    #[test]
    fn test_connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_camera_facing_flips() {
        assert_eq!(CameraFacing::Front.flipped(), CameraFacing::Rear);
        assert_eq!(CameraFacing::Rear.flipped(), CameraFacing::Front);
    }

    #[test]
    fn test_media_kind() {
        assert!(MediaKind::Video.has_video());
        assert!(!MediaKind::Audio.has_video());
    }

    #[test]
    fn test_call_target_serialization() {
        let target: CallTarget<UserId> = CallTarget::Individual {
            id: UserId::new("alice"),
        };
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"kind\":\"individual\""));

        let group: CallTarget<UserId> = CallTarget::Group {
            id: "family".to_string(),
        };
        let json = serde_json::to_string(&group).unwrap();
        assert!(json.contains("\"kind\":\"group\""));
        let back: CallTarget<UserId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, group);
    }
}
