//! Per-peer conversation state.
//!
//! A conversation tracks where the secure channel stands with one peer: the
//! protocol state machine, the peer's key fingerprint and its verification
//! status, and the plaintext messages queued while a key negotiation is in
//! flight.

use crate::error::{Error, Result};
use crate::identity::{Fingerprint, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The conversation's protocol state machine.
///
/// `Plaintext → AwaitingAke → Encrypted`; any state moves to `Finished` on
/// peer-initiated termination and to `Error` on authentication or parse
/// failure. `Error` only leaves via an explicit user-initiated restart.
/// `Finished` and `Error` are terminal for the current session key: no
/// traffic is encrypted or decrypted in them until a fresh negotiation
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolState {
    /// No secure channel; traffic is cleartext.
    Plaintext,
    /// A key negotiation is in flight.
    AwaitingAke,
    /// A session key is established; traffic is encrypted.
    Encrypted,
    /// The peer ended the secure session.
    Finished,
    /// The session failed; waiting for the user to restart.
    Error,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolState::Plaintext => "plaintext",
            ProtocolState::AwaitingAke => "awaiting key exchange",
            ProtocolState::Encrypted => "encrypted",
            ProtocolState::Finished => "finished",
            ProtocolState::Error => "error",
        };
        f.write_str(name)
    }
}

/// How an observed fingerprint relates to what the conversation knew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintChange {
    /// Same fingerprint as before.
    Unchanged,
    /// First fingerprint seen for this peer.
    Established,
    /// The fingerprint differs from the previous one; verification was
    /// cleared.
    Changed,
}

/// Conversation record for one peer.
#[derive(Debug)]
pub struct ConversationState {
    peer: PeerId,
    protocol_state: ProtocolState,
    remote_fingerprint: Option<Fingerprint>,
    verified: bool,
    pending: VecDeque<String>,
    ake_generation: u64,
}

impl ConversationState {
    /// Create a fresh conversation in the plaintext state.
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            protocol_state: ProtocolState::Plaintext,
            remote_fingerprint: None,
            verified: false,
            pending: VecDeque::new(),
            ake_generation: 0,
        }
    }

    /// The peer this conversation is with.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        self.protocol_state
    }

    /// Move to a new protocol state.
    pub fn set_state(&mut self, state: ProtocolState) {
        self.protocol_state = state;
    }

    /// The peer's fingerprint, once key material has been seen.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.remote_fingerprint.as_ref()
    }

    /// Whether the user has verified the current fingerprint out-of-band.
    pub fn verified(&self) -> bool {
        self.verified
    }

    /// Record user verification of the current fingerprint.
    ///
    /// Fails when no fingerprint has been established yet, preserving the
    /// invariant that `verified` implies a known fingerprint.
    pub fn mark_verified(&mut self) -> Result<()> {
        if self.remote_fingerprint.is_none() {
            return Err(Error::NoFingerprint);
        }
        self.verified = true;
        Ok(())
    }

    /// Clear the verification mark.
    pub fn clear_verified(&mut self) {
        self.verified = false;
    }

    /// Record a fingerprint reported by the engine.
    ///
    /// A changed fingerprint clears `verified`: trust never survives a key
    /// change.
    pub fn observe_fingerprint(&mut self, fingerprint: Fingerprint) -> FingerprintChange {
        match &self.remote_fingerprint {
            Some(known) if *known == fingerprint => FingerprintChange::Unchanged,
            Some(_) => {
                self.remote_fingerprint = Some(fingerprint);
                self.verified = false;
                FingerprintChange::Changed
            }
            None => {
                self.remote_fingerprint = Some(fingerprint);
                FingerprintChange::Established
            }
        }
    }

    /// Queue a plaintext message while a negotiation is in flight.
    ///
    /// Returns how many old entries were dropped to respect `limit`
    /// (drop-oldest policy).
    pub fn enqueue(&mut self, body: String, limit: usize) -> usize {
        self.pending.push_back(body);
        let mut dropped = 0;
        while self.pending.len() > limit.max(1) {
            self.pending.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Take every queued message, oldest first.
    pub fn drain_pending(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Number of queued messages.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard the queue, returning how many messages were dropped.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Start a new negotiation attempt, returning its generation number.
    ///
    /// Timeout watchdogs compare generations so a stale timer never poisons
    /// a later negotiation.
    pub fn begin_ake(&mut self) -> u64 {
        self.ake_generation += 1;
        self.ake_generation
    }

    /// The current negotiation generation.
    pub fn ake_generation(&self) -> u64 {
        self.ake_generation
    }

    /// Lock-free view for UI display.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            peer: self.peer.clone(),
            state: self.protocol_state,
            fingerprint: self.remote_fingerprint.clone(),
            verified: self.verified,
            pending: self.pending.len(),
        }
    }
}

/// Point-in-time copy of a conversation's display-relevant fields.
///
/// Safe to read without the conversation lock, but must not be used to
/// authorize encryption decisions: only the locked state decides those.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    /// The peer the conversation is with.
    pub peer: PeerId,
    /// Protocol state at snapshot time.
    pub state: ProtocolState,
    /// Known fingerprint, if any.
    pub fingerprint: Option<Fingerprint>,
    /// Whether that fingerprint was user-verified.
    pub verified: bool,
    /// Number of messages queued behind a negotiation.
    pub pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationState {
        ConversationState::new(PeerId::new("bob@example.org"))
    }

    #[test]
    fn starts_plaintext_and_unverified() {
        let c = conv();
        assert_eq!(c.state(), ProtocolState::Plaintext);
        assert!(!c.verified());
        assert!(c.fingerprint().is_none());
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn verify_requires_fingerprint() {
        let mut c = conv();
        assert!(matches!(c.mark_verified(), Err(Error::NoFingerprint)));

        c.observe_fingerprint(Fingerprint::from_bytes(vec![1; 32]));
        c.mark_verified().expect("verify");
        assert!(c.verified());
    }

    #[test]
    fn changed_fingerprint_clears_verified() {
        let mut c = conv();
        assert_eq!(
            c.observe_fingerprint(Fingerprint::from_bytes(vec![1; 32])),
            FingerprintChange::Established
        );
        c.mark_verified().expect("verify");

        assert_eq!(
            c.observe_fingerprint(Fingerprint::from_bytes(vec![1; 32])),
            FingerprintChange::Unchanged
        );
        assert!(c.verified());

        assert_eq!(
            c.observe_fingerprint(Fingerprint::from_bytes(vec![2; 32])),
            FingerprintChange::Changed
        );
        assert!(!c.verified());
    }

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let mut c = conv();
        assert_eq!(c.enqueue("m1".into(), 2), 0);
        assert_eq!(c.enqueue("m2".into(), 2), 0);
        assert_eq!(c.enqueue("m3".into(), 2), 1);
        assert_eq!(c.drain_pending(), vec!["m2".to_string(), "m3".to_string()]);
    }

    #[test]
    fn drain_preserves_order_and_empties_the_queue() {
        let mut c = conv();
        c.enqueue("m1".into(), 8);
        c.enqueue("m2".into(), 8);
        assert_eq!(c.drain_pending(), vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn ake_generations_increase() {
        let mut c = conv();
        let g1 = c.begin_ake();
        let g2 = c.begin_ake();
        assert!(g2 > g1);
        assert_eq!(c.ake_generation(), g2);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut c = conv();
        c.set_state(ProtocolState::AwaitingAke);
        c.enqueue("queued".into(), 8);
        let snap = c.snapshot();
        assert_eq!(snap.state, ProtocolState::AwaitingAke);
        assert_eq!(snap.pending, 1);
        assert!(!snap.verified);
    }
}
