//! Per-peer conversation sessions.
//!
//! [`ConversationRegistry`] owns one [`ConversationState`] per peer,
//! [`SessionController`] orchestrates the send/receive paths over them.

mod controller;
mod conversation;
mod registry;

pub use controller::{AkeStart, SendOutcome, SessionController};
pub use conversation::{
    ConversationSnapshot, ConversationState, FingerprintChange, ProtocolState,
};
pub use registry::ConversationRegistry;

use crate::identity::PeerId;
use std::fmt;

/// An outbound payload for the transport, tagged with its destination.
///
/// Framing and delivery are the transport's responsibility; the session core
/// only produces the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Destination peer.
    pub peer: PeerId,
    /// Opaque payload bytes.
    pub bytes: Vec<u8>,
}

impl WireMessage {
    /// Create a wire message.
    pub fn new(peer: PeerId, bytes: Vec<u8>) -> Self {
        Self { peer, bytes }
    }
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads may be ciphertext or cleartext; log only the length.
        write!(f, "WireMessage({} -> [{} bytes])", self.peer, self.bytes.len())
    }
}
