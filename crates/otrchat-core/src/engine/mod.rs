//! The cryptographic engine boundary.
//!
//! The session core does not implement cryptography. It consumes a
//! [`CryptoEngine`]: an opaque capability that runs the authenticated key
//! exchange (AKE) and encrypts/decrypts message traffic, keyed by peer. The
//! core feeds it raw wire bytes and acts on the [`ProtocolStep`] it reports.
//!
//! [`x25519::X25519Engine`] is a reference implementation built from the
//! same audited primitives the rest of the stack uses (X25519, HKDF-SHA256,
//! ChaCha20-Poly1305). It exists so the session layer can be exercised end
//! to end; production deployments may plug in any engine that honors the
//! trait contract.

pub mod aead;
pub mod x25519;

pub use x25519::{X25519Engine, WIRE_MAGIC};

use crate::error::Result;
use crate::identity::{Fingerprint, PeerId};

/// Outcome of feeding one inbound wire payload to the engine.
///
/// Cleartext passthrough and decrypted traffic are distinct variants: the
/// session layer labels messages by provenance and refuses decrypted
/// payloads while a conversation sits in a terminal state.
#[derive(Debug)]
pub enum ProtocolStep {
    /// The payload was cleartext passthrough from a peer without a secure
    /// channel.
    Plaintext(Vec<u8>),
    /// The payload was protocol data traffic, decrypted over the established
    /// session key.
    Decrypted(Vec<u8>),
    /// A protocol control message was absorbed. `reply`, when present, must
    /// be written back to the wire.
    ControlConsumed {
        /// Bytes to send back to the peer.
        reply: Option<Vec<u8>>,
    },
    /// The key exchange advanced.
    AkeAdvanced {
        /// True once a session key exists and traffic may be encrypted.
        established: bool,
        /// Bytes to send back to the peer, when the handshake needs a reply.
        reply: Option<Vec<u8>>,
    },
    /// The peer explicitly terminated the secure session.
    Terminated,
}

/// The cryptographic capability the session core depends on.
///
/// Implementations must be idempotent with respect to in-order replay of
/// control messages: re-interpreting an already-applied AKE message reports
/// the same outcome without disturbing established state. All methods are
/// called with the owning conversation's lock held, so implementations only
/// need interior mutability, not cross-call coordination.
pub trait CryptoEngine: Send + Sync {
    /// Begin a key exchange with `peer`, returning the initial wire message.
    fn start_ake(&self, peer: &PeerId) -> Result<Vec<u8>>;

    /// Interpret one inbound wire payload from `peer`.
    ///
    /// Errors use the session taxonomy: undecryptable traffic is
    /// [`Error::DecryptionFailed`](crate::Error::DecryptionFailed),
    /// unparseable protocol data is
    /// [`Error::MalformedMessage`](crate::Error::MalformedMessage), and
    /// handshake violations are [`Error::AkeFailed`](crate::Error::AkeFailed).
    fn interpret(&self, peer: &PeerId, bytes: &[u8]) -> Result<ProtocolStep>;

    /// Encrypt `plaintext` for `peer` over the established session.
    fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a wire payload produced by [`CryptoEngine::encrypt`].
    fn decrypt(&self, peer: &PeerId, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// The peer's key fingerprint, once key material is known.
    fn fingerprint(&self, peer: &PeerId) -> Option<Fingerprint>;

    /// Discard all session key material for `peer`.
    ///
    /// Returns the protocol's termination frame for the wire when an
    /// established session existed, so the peer learns the channel ended.
    fn end_session(&self, peer: &PeerId) -> Option<Vec<u8>>;
}
