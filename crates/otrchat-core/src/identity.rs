//! Identity types: local accounts, remote peers, and key fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for the local account (the account's address/JID).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The account address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque identifier for a remote conversation partner.
///
/// Either a bare address (`user@host`) or a full one (`user@host/resource`).
/// The registry treats the identifier as an opaque key: two lookups with the
/// same `PeerId` under one account resolve to the same conversation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The peer address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare form of the address, with any `/resource` suffix removed.
    pub fn bare(&self) -> &str {
        match self.0.split_once('/') {
            Some((bare, _)) => bare,
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A human-verifiable digest of a peer's public key material.
///
/// Displayed as lowercase hex for out-of-band comparison. Debug output is
/// truncated so full fingerprints do not end up in logs by accident.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// Create a fingerprint from digest bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(4);
        write!(f, "Fingerprint({}...)", hex::encode(&self.0[..shown]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_strips_resource() {
        assert_eq!(PeerId::new("bob@example.org/laptop").bare(), "bob@example.org");
        assert_eq!(PeerId::new("bob@example.org").bare(), "bob@example.org");
    }

    #[test]
    fn peer_ids_compare_by_value() {
        assert_eq!(PeerId::new("a@b"), PeerId::from("a@b"));
        assert_ne!(PeerId::new("a@b"), PeerId::new("a@b/r"));
    }

    #[test]
    fn fingerprint_debug_is_truncated() {
        let fp = Fingerprint::from_bytes(vec![0xab; 32]);
        let debug = format!("{:?}", fp);
        assert!(debug.contains("abababab"));
        assert!(!debug.contains(&"ab".repeat(32)));
        assert_eq!(fp.to_string(), "ab".repeat(32));
    }
}
