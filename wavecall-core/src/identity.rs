//! User identity abstraction
//!
//! The relay and the client engine are generic over the account scheme. Any
//! identity system can plug in (opaque account ids, phone-number strings,
//! cryptographic addresses) as long as it satisfies [`UserIdentity`].

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait for a stable user identity.
///
/// Identities are owned by the auth/profile collaborator and read-only here:
/// the core resolves and routes by them but never creates or mutates them.
/// `Eq + Hash` are required because the connection registry keys its maps by
/// identity directly.
pub trait UserIdentity:
    Clone
    + Debug
    + Display
    + Eq
    + Hash
    + Serialize
    + for<'de> Deserialize<'de>
    + Send
    + Sync
    + 'static
{
    /// Convert the identity to a string representation
    fn to_string_repr(&self) -> String;

    /// Try to create an identity from a string representation
    fn from_string_repr(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

/// Simple string-based user identity
///
/// Suitable for testing and for deployments where the auth collaborator hands
/// out opaque string account ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new string-based user identity
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UserIdentity for UserId {
    fn to_string_repr(&self) -> String {
        self.0.clone()
    }

    fn from_string_repr(s: &str) -> anyhow::Result<Self> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
