//! Reference engine: X25519 key agreement + ChaCha20-Poly1305 traffic keys.
//!
//! A deliberately small engine used to exercise the session layer. The
//! handshake is two messages: the initiator sends its static public key, the
//! responder replies with its own, and both sides derive the same session
//! key via HKDF-SHA256 over the shared secret. Fingerprints are SHA-256 over
//! the peer's public key.
//!
//! Wire framing: protocol messages start with [`WIRE_MAGIC`]; anything else
//! is passed through as cleartext. Frames are bincode-encoded.

use super::aead;
use super::{CryptoEngine, ProtocolStep};
use crate::error::{Error, Result};
use crate::identity::{Fingerprint, PeerId};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Tag marking the start of an engine protocol frame on the wire.
///
/// Inbound payloads without this prefix are cleartext passthrough.
pub const WIRE_MAGIC: &[u8] = b"\x01OCP1";

/// Associated data binding sealed boxes to this protocol.
const DATA_AAD: &[u8] = b"otrchat-core data v1";

/// HKDF info string for session key derivation.
const KEY_INFO: &[u8] = b"otrchat-core session key v1";

/// Protocol frames exchanged between two engines.
#[derive(Serialize, Deserialize)]
enum Frame {
    /// Initiator's half of the key exchange.
    AkeRequest { public: [u8; 32] },
    /// Responder's half of the key exchange.
    AkeReply { public: [u8; 32] },
    /// An encrypted data message (nonce-prepended sealed box).
    Data { body: Vec<u8> },
    /// Explicit session termination.
    Bye,
}

/// Per-peer engine state.
struct EngineSession {
    /// We initiated and are waiting for the reply.
    awaiting_reply: bool,
    /// The peer's static public key, once seen.
    remote_public: Option<[u8; 32]>,
    /// The derived session key, once established.
    key: Option<Zeroizing<[u8; aead::KEY_SIZE]>>,
}

impl EngineSession {
    fn empty() -> Self {
        Self {
            awaiting_reply: false,
            remote_public: None,
            key: None,
        }
    }
}

/// Reference [`CryptoEngine`] backed by X25519 static keys.
pub struct X25519Engine {
    secret: StaticSecret,
    public: PublicKey,
    sessions: Mutex<HashMap<PeerId, EngineSession>>,
    negotiations: AtomicUsize,
}

impl Default for X25519Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl X25519Engine {
    /// Create an engine with a freshly generated identity key.
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            sessions: Mutex::new(HashMap::new()),
            negotiations: AtomicUsize::new(0),
        }
    }

    /// This engine's public identity key.
    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// How many key negotiations this engine has initiated. Diagnostic.
    pub fn negotiations_started(&self) -> usize {
        self.negotiations.load(Ordering::Relaxed)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<PeerId, EngineSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn frame_bytes(frame: &Frame) -> Result<Vec<u8>> {
        let mut out = WIRE_MAGIC.to_vec();
        let body =
            bincode::serialize(frame).map_err(|e| Error::Engine(format!("frame encode: {e}")))?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Derive the shared session key. Symmetric in the two public keys, so
    /// initiator and responder arrive at the same key.
    fn derive_key(&self, remote_public: &[u8; 32]) -> Result<Zeroizing<[u8; aead::KEY_SIZE]>> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));

        let ours = self.public.as_bytes();
        let mut salt = [0u8; 64];
        if ours.as_slice() <= remote_public.as_slice() {
            salt[..32].copy_from_slice(ours);
            salt[32..].copy_from_slice(remote_public);
        } else {
            salt[..32].copy_from_slice(remote_public);
            salt[32..].copy_from_slice(ours);
        }

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut key = Zeroizing::new([0u8; aead::KEY_SIZE]);
        hkdf.expand(KEY_INFO, key.as_mut())
            .map_err(|_| Error::Engine("key derivation failed".into()))?;
        Ok(key)
    }

    fn establish(
        &self,
        sessions: &mut HashMap<PeerId, EngineSession>,
        peer: &PeerId,
        remote_public: [u8; 32],
        awaiting_reply: bool,
    ) -> Result<()> {
        let key = self.derive_key(&remote_public)?;
        let session = sessions
            .entry(peer.clone())
            .or_insert_with(EngineSession::empty);
        session.remote_public = Some(remote_public);
        session.key = Some(key);
        session.awaiting_reply = awaiting_reply;
        Ok(())
    }
}

impl CryptoEngine for X25519Engine {
    fn start_ake(&self, peer: &PeerId) -> Result<Vec<u8>> {
        let mut sessions = self.sessions();
        let session = sessions
            .entry(peer.clone())
            .or_insert_with(EngineSession::empty);
        // Any previously established key stays valid until the new exchange
        // completes; only the pending flag changes.
        session.awaiting_reply = true;
        self.negotiations.fetch_add(1, Ordering::Relaxed);
        Self::frame_bytes(&Frame::AkeRequest {
            public: *self.public.as_bytes(),
        })
    }

    fn interpret(&self, peer: &PeerId, bytes: &[u8]) -> Result<ProtocolStep> {
        if !bytes.starts_with(WIRE_MAGIC) {
            return Ok(ProtocolStep::Plaintext(bytes.to_vec()));
        }

        let frame: Frame = bincode::deserialize(&bytes[WIRE_MAGIC.len()..])
            .map_err(|_| Error::MalformedMessage { peer: peer.clone() })?;

        match frame {
            Frame::AkeRequest { public } => {
                // Replays re-derive the same key, so this is idempotent.
                let mut sessions = self.sessions();
                self.establish(&mut sessions, peer, public, false)?;
                let reply = Self::frame_bytes(&Frame::AkeReply {
                    public: *self.public.as_bytes(),
                })?;
                Ok(ProtocolStep::AkeAdvanced {
                    established: true,
                    reply: Some(reply),
                })
            }
            Frame::AkeReply { public } => {
                let mut sessions = self.sessions();
                match sessions.get(peer) {
                    Some(session) if session.awaiting_reply => {
                        self.establish(&mut sessions, peer, public, false)?;
                        Ok(ProtocolStep::AkeAdvanced {
                            established: true,
                            reply: None,
                        })
                    }
                    // A replayed reply for the key we already hold.
                    Some(session) if session.remote_public == Some(public) => {
                        Ok(ProtocolStep::AkeAdvanced {
                            established: true,
                            reply: None,
                        })
                    }
                    _ => Err(Error::AkeFailed {
                        peer: peer.clone(),
                        cause: "unsolicited key exchange reply".into(),
                    }),
                }
            }
            Frame::Data { body } => {
                let sessions = self.sessions();
                let key = sessions
                    .get(peer)
                    .and_then(|s| s.key.as_ref())
                    .ok_or_else(|| Error::DecryptionFailed { peer: peer.clone() })?;
                let plaintext = aead::open(key, &body, DATA_AAD)
                    .map_err(|_| Error::DecryptionFailed { peer: peer.clone() })?;
                Ok(ProtocolStep::Decrypted(plaintext.to_vec()))
            }
            Frame::Bye => {
                self.sessions().remove(peer);
                Ok(ProtocolStep::Terminated)
            }
        }
    }

    fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sessions = self.sessions();
        let key = sessions
            .get(peer)
            .and_then(|s| s.key.as_ref())
            .ok_or_else(|| Error::EncryptionFailed {
                peer: peer.clone(),
                cause: "no session key".into(),
            })?;
        let body = aead::seal(key, plaintext, DATA_AAD).map_err(|_| Error::EncryptionFailed {
            peer: peer.clone(),
            cause: "seal failed".into(),
        })?;
        Self::frame_bytes(&Frame::Data { body })
    }

    fn decrypt(&self, peer: &PeerId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.interpret(peer, ciphertext)? {
            ProtocolStep::Decrypted(body) => Ok(body),
            _ => Err(Error::DecryptionFailed { peer: peer.clone() }),
        }
    }

    fn fingerprint(&self, peer: &PeerId) -> Option<Fingerprint> {
        let sessions = self.sessions();
        let remote = sessions.get(peer)?.remote_public?;
        let digest = Sha256::digest(remote);
        Some(Fingerprint::from_bytes(digest.to_vec()))
    }

    fn end_session(&self, peer: &PeerId) -> Option<Vec<u8>> {
        let had_key = self
            .sessions()
            .remove(peer)
            .map_or(false, |s| s.key.is_some());
        if had_key {
            Self::frame_bytes(&Frame::Bye).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (X25519Engine, X25519Engine, PeerId, PeerId) {
        (
            X25519Engine::new(),
            X25519Engine::new(),
            PeerId::new("bob@example.org"),
            PeerId::new("alice@example.org"),
        )
    }

    fn handshake(alice: &X25519Engine, bob: &X25519Engine, to_bob: &PeerId, to_alice: &PeerId) {
        let request = alice.start_ake(to_bob).expect("start");
        let step = bob.interpret(to_alice, &request).expect("interpret request");
        let reply = match step {
            ProtocolStep::AkeAdvanced {
                established: true,
                reply: Some(reply),
            } => reply,
            other => panic!("unexpected step: {other:?}"),
        };
        match alice.interpret(to_bob, &reply).expect("interpret reply") {
            ProtocolStep::AkeAdvanced {
                established: true,
                reply: None,
            } => {}
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn handshake_establishes_both_sides() {
        let (alice, bob, to_bob, to_alice) = pair();
        handshake(&alice, &bob, &to_bob, &to_alice);

        assert!(alice.fingerprint(&to_bob).is_some());
        assert!(bob.fingerprint(&to_alice).is_some());
        assert_eq!(
            alice.fingerprint(&to_bob).expect("fp"),
            Fingerprint::from_bytes(Sha256::digest(bob.public_key()).to_vec())
        );
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (alice, bob, to_bob, to_alice) = pair();
        handshake(&alice, &bob, &to_bob, &to_alice);

        let wire = alice.encrypt(&to_bob, b"attack at dawn").expect("encrypt");
        assert!(!wire.windows(14).any(|w| w == b"attack at dawn"));

        let plain = bob.decrypt(&to_alice, &wire).expect("decrypt");
        assert_eq!(plain, b"attack at dawn");
    }

    #[test]
    fn cleartext_passes_through() {
        let (alice, _, to_bob, _) = pair();
        match alice.interpret(&to_bob, b"plain old text").expect("interpret") {
            ProtocolStep::Plaintext(body) => assert_eq!(body, b"plain old text"),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn garbage_after_magic_is_malformed() {
        let (alice, _, to_bob, _) = pair();
        let mut bytes = WIRE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0xff; 7]);
        assert!(matches!(
            alice.interpret(&to_bob, &bytes),
            Err(Error::MalformedMessage { .. })
        ));
    }

    #[test]
    fn tampered_data_is_decryption_failure() {
        let (alice, bob, to_bob, to_alice) = pair();
        handshake(&alice, &bob, &to_bob, &to_alice);

        let mut wire = alice.encrypt(&to_bob, b"payload").expect("encrypt");
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(
            bob.interpret(&to_alice, &wire),
            Err(Error::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn data_without_session_is_decryption_failure() {
        let (alice, bob, to_bob, to_alice) = pair();
        handshake(&alice, &bob, &to_bob, &to_alice);

        let wire = alice.encrypt(&to_bob, b"hello").expect("encrypt");
        let stranger = X25519Engine::new();
        assert!(matches!(
            stranger.interpret(&to_alice, &wire),
            Err(Error::DecryptionFailed { .. })
        ));
        drop(bob);
    }

    #[test]
    fn replayed_reply_is_idempotent() {
        let (alice, bob, to_bob, to_alice) = pair();
        let request = alice.start_ake(&to_bob).expect("start");
        let reply = match bob.interpret(&to_alice, &request).expect("step") {
            ProtocolStep::AkeAdvanced { reply: Some(r), .. } => r,
            other => panic!("unexpected step: {other:?}"),
        };
        alice.interpret(&to_bob, &reply).expect("first apply");
        let fp_before = alice.fingerprint(&to_bob).expect("fp");

        // Replay: same outcome, no fresh reply, key untouched.
        match alice.interpret(&to_bob, &reply).expect("replay") {
            ProtocolStep::AkeAdvanced {
                established: true,
                reply: None,
            } => {}
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(alice.fingerprint(&to_bob).expect("fp"), fp_before);
    }

    #[test]
    fn unsolicited_reply_fails() {
        let (alice, _, to_bob, _) = pair();
        let bogus = X25519Engine::frame_bytes(&Frame::AkeReply { public: [9u8; 32] })
            .expect("frame");
        assert!(matches!(
            alice.interpret(&to_bob, &bogus),
            Err(Error::AkeFailed { .. })
        ));
    }

    #[test]
    fn ending_a_session_produces_a_farewell_the_peer_understands() {
        let (alice, bob, to_bob, to_alice) = pair();
        handshake(&alice, &bob, &to_bob, &to_alice);

        let bye = alice.end_session(&to_bob).expect("farewell frame");
        assert!(alice.fingerprint(&to_bob).is_none());

        assert!(matches!(
            bob.interpret(&to_alice, &bye).expect("interpret"),
            ProtocolStep::Terminated
        ));
        assert!(bob.fingerprint(&to_alice).is_none());
    }

    #[test]
    fn ending_without_a_key_produces_no_farewell() {
        let (alice, _, to_bob, _) = pair();
        assert!(alice.end_session(&to_bob).is_none());

        alice.start_ake(&to_bob).expect("start");
        // Negotiation in flight but no key yet.
        assert!(alice.end_session(&to_bob).is_none());
    }

    #[test]
    fn negotiation_counter_tracks_starts() {
        let (alice, _, to_bob, _) = pair();
        assert_eq!(alice.negotiations_started(), 0);
        alice.start_ake(&to_bob).expect("start");
        alice.start_ake(&to_bob).expect("start again");
        assert_eq!(alice.negotiations_started(), 2);
    }
}
