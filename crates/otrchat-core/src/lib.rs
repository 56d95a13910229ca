//! # otrchat-core
//!
//! Per-peer encrypted conversation session manager for a desktop instant
//! messaging client. The crate tracks, for each remote contact, whether a
//! secure channel exists, drives the authenticated key exchange (AKE),
//! encrypts and decrypts message traffic, and fans lifecycle events out to
//! installed observers.
//!
//! The GUI, the network transport, and roster storage are external
//! collaborators: the UI issues commands to [`SessionController`] and
//! subscribes to an [`EventSink`], the transport carries the opaque
//! [`WireMessage`] payloads the controller produces.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        UI / transport (external)        │
//! ├─────────────────────────────────────────┤
//! │   account  │  session  │     event      │
//! ├─────────────────────────────────────────┤
//! │          engine (CryptoEngine)          │
//! ├─────────────────────────────────────────┤
//! │        identity │ config │ error        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Inbound wire bytes flow through [`SessionController::receive`], which asks
//! the engine to interpret them, updates the per-peer conversation record and
//! emits events. Outbound plaintext flows through
//! [`SessionController::send`], which encrypts (or queues, or passes through
//! as cleartext, depending on state and policy) and hands wire bytes back to
//! the transport.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod identity;
pub mod logging;
pub mod session;

pub use account::Account;
pub use config::SessionConfig;
pub use engine::{CryptoEngine, ProtocolStep};
pub use error::{Error, Result};
pub use event::{ChannelSink, Event, EventSink, SinkSet, TracingSink};
pub use identity::{AccountId, Fingerprint, PeerId};
pub use session::{
    AkeStart, ConversationRegistry, ConversationSnapshot, ConversationState, ProtocolState,
    SendOutcome, SessionController, WireMessage,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
