use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Opaque channel identity, owned by the external catalog collaborator.
/// The core treats it as an opaque string, not a UUID — channels may be
/// created by systems that mint their own identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a user, as resolved by the identity collaborator. Distinct
/// from [`DeviceToken`]: one user may hold several devices/tokens at once.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied opaque identifier for one client installation on one
/// device (the "ephemeral push token" of the glossary). The core validates
/// shape only: non-empty, printable, length <= 256.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceToken(pub String);

impl DeviceToken {
    pub const MAX_LEN: usize = 256;

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Shape validation only (non-empty, printable, bounded length); the
    /// core does not and cannot validate the token's semantics.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= Self::MAX_LEN
            && self.0.chars().all(|c| !c.is_control())
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fresh opaque identifier for one transmission session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collision-resistant ID generator: 16 random bytes, base32-ish (hex here,
/// which is simpler to eyeball in logs and just as collision-resistant at
/// this byte count).
pub struct IdGenerator;

impl IdGenerator {
    pub fn session_id() -> SessionId {
        SessionId(format!("sess_{}", Self::random_token(16)))
    }

    fn random_token(num_bytes: usize) -> String {
        let mut buf = vec![0u8; num_bytes];
        rand::rng().fill_bytes(&mut buf);
        buf.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_token_shape_validation() {
        assert!(DeviceToken::new("abc-123").is_well_formed());
        assert!(!DeviceToken::new("").is_well_formed());
        assert!(!DeviceToken::new("a\nb").is_well_formed());
        assert!(!DeviceToken::new("x".repeat(257)).is_well_formed());
    }

    #[test]
    fn session_ids_are_unique() {
        let a = IdGenerator::session_id();
        let b = IdGenerator::session_id();
        assert_ne!(a, b);
    }
}
