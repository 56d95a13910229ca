//! Error types for the conversation session core.
//!
//! Display messages are intentionally generic: they never carry plaintext,
//! key material, or cipher internals. Diagnostic detail lives in structured
//! fields and is redacted where it could leak.

use crate::identity::PeerId;
use thiserror::Error;

/// Core error type for session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Encrypting an outbound message failed. The conversation state is
    /// left untouched and nothing was sent.
    #[error("encryption failed for {peer}")]
    EncryptionFailed {
        /// Peer the message was addressed to.
        peer: PeerId,
        /// Engine-supplied cause, free of sensitive material.
        cause: String,
    },

    /// Decrypting an inbound message failed. The message is dropped and
    /// never surfaced as plaintext.
    #[error("decryption failed for {peer}")]
    DecryptionFailed {
        /// Peer the message came from.
        peer: PeerId,
    },

    /// The authenticated key exchange failed; the conversation moves to the
    /// error state until the user restarts it.
    #[error("key negotiation failed for {peer}")]
    AkeFailed {
        /// Peer the negotiation was with.
        peer: PeerId,
        /// Engine-supplied cause.
        cause: String,
    },

    /// An inbound protocol message could not be parsed.
    #[error("malformed protocol message from {peer}")]
    MalformedMessage {
        /// Peer the message came from.
        peer: PeerId,
    },

    /// A fingerprint operation was attempted before the peer's key material
    /// was known.
    #[error("no fingerprint established")]
    NoFingerprint,

    /// The operation names a peer with no conversation record, and the
    /// operation does not imply creating one.
    #[error("unknown peer")]
    UnknownPeer,

    /// Opaque engine fault that maps to no other variant.
    #[error("engine error")]
    Engine(String),
}

/// Result type alias using the session core's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error moves the conversation to the error state.
    ///
    /// Decryption failures drop the offending message but leave the session
    /// usable; negotiation and parse failures poison it.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            Error::AkeFailed { .. } | Error::MalformedMessage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_generic() {
        let err = Error::EncryptionFailed {
            peer: PeerId::new("alice@example.org"),
            cause: "no session key".into(),
        };
        let text = err.to_string();
        assert!(text.contains("alice@example.org"));
        assert!(!text.contains("no session key"));
    }

    #[test]
    fn poisoning_classification() {
        let peer = PeerId::new("bob@example.org");
        assert!(Error::AkeFailed {
            peer: peer.clone(),
            cause: String::new()
        }
        .poisons_session());
        assert!(Error::MalformedMessage { peer: peer.clone() }.poisons_session());
        assert!(!Error::DecryptionFailed { peer }.poisons_session());
        assert!(!Error::NoFingerprint.poisons_session());
    }
}
