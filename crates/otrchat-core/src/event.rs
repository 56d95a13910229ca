//! Session lifecycle events and the observer surface they are delivered to.
//!
//! The session core never talks to a UI directly. It constructs [`Event`]
//! values and hands them to every installed [`EventSink`]. Sinks are
//! polymorphic: a GUI, a logger, and a test harness can all be installed at
//! once. Dispatch always happens after conversation locks are released, so a
//! sink may synchronously call back into the controller (for example to send
//! an auto-reply) without deadlocking.

use crate::identity::{AccountId, Fingerprint, PeerId};
use crate::logging::{RedactedBody, RedactedFingerprint};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A notification emitted by the session core.
///
/// Immutable once constructed; ownership transfers to each sink on dispatch.
/// Events for one peer are generated in order; no ordering is guaranteed
/// across peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Diagnostic chatter, uninteresting to end users.
    Debug(String),
    /// Informational status, suitable for a status bar.
    Info(String),
    /// Something went wrong but the session survives.
    Warn(String),
    /// Something the user must see.
    Alert(String),
    /// A secure channel key was established or replaced for a peer.
    NewKeys {
        /// Peer the keys belong to.
        peer: PeerId,
        /// The peer's current key fingerprint.
        fingerprint: Fingerprint,
    },
    /// A message is ready for display. Also emitted as a local echo when we
    /// send, so the UI shows exactly what went out without ever decrypting
    /// its own ciphertext.
    MessageReceived {
        /// Who the message is from (the local account for echoes).
        from: PeerId,
        /// When the message was processed.
        timestamp: DateTime<Utc>,
        /// Whether the message travelled over the secure channel.
        encrypted: bool,
        /// The plaintext body.
        body: String,
    },
    /// A presence update from the roster layer.
    Presence {
        /// Who the presence is about.
        from: PeerId,
        /// The local account it was addressed to.
        to: AccountId,
        /// Availability show value (`away`, `dnd`, ...).
        show: String,
        /// Free-form status text.
        status: String,
        /// Whether the peer signed off.
        gone: bool,
    },
    /// A peer asked to subscribe to our presence.
    SubscriptionRequest {
        /// The requesting peer.
        peer: PeerId,
    },
    /// A subscription to a peer's presence was granted.
    Subscribed {
        /// The local account.
        account: AccountId,
        /// The peer involved.
        peer: PeerId,
    },
    /// A presence subscription was removed.
    Unsubscribed {
        /// The local account.
        account: AccountId,
        /// The peer involved.
        peer: PeerId,
    },
    /// The server requests in-band registration details.
    RegisterForm {
        /// Form title.
        title: String,
        /// Instructions to show the user.
        instructions: String,
        /// Field names to fill in.
        fields: Vec<String>,
    },
}

/// Consumer of session lifecycle events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations must not block for long; slow
    /// consumers should hand the event to a channel.
    fn deliver(&self, event: Event);
}

/// Fan-out set of installed sinks.
///
/// Cloning is cheap; all clones share the same sink list.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl SinkSet {
    /// Create an empty sink set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a sink. Every subsequent event is delivered to it.
    pub fn install(&self, sink: Arc<dyn EventSink>) {
        let mut sinks = match self.sinks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sinks.push(sink);
    }

    /// Number of installed sinks.
    pub fn len(&self) -> usize {
        match self.sinks.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether no sinks are installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every installed sink.
    ///
    /// The sink list is snapshotted first so a sink that installs another
    /// sink from inside `deliver` does not deadlock.
    pub fn dispatch(&self, event: Event) {
        let sinks: Vec<Arc<dyn EventSink>> = {
            let guard = match self.sinks.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        for sink in sinks {
            sink.deliver(event.clone());
        }
    }

    /// Deliver a batch of events in order.
    pub fn dispatch_all(&self, events: Vec<Event>) {
        for event in events {
            self.dispatch(event);
        }
    }
}

/// Sink that maps events onto `tracing` log records.
///
/// Message bodies and fingerprints are redacted before logging.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, event: Event) {
        match event {
            Event::Debug(msg) => debug!(target: "otrchat::session", "{msg}"),
            Event::Info(msg) => info!(target: "otrchat::session", "{msg}"),
            Event::Warn(msg) => warn!(target: "otrchat::session", "{msg}"),
            Event::Alert(msg) => warn!(target: "otrchat::session", alert = true, "{msg}"),
            Event::NewKeys { peer, fingerprint } => {
                info!(
                    target: "otrchat::session",
                    %peer,
                    fingerprint = %RedactedFingerprint(&fingerprint),
                    "new conversation keys"
                );
            }
            Event::MessageReceived {
                from, encrypted, body, ..
            } => {
                debug!(
                    target: "otrchat::session",
                    %from,
                    encrypted,
                    body = %RedactedBody(&body),
                    "message"
                );
            }
            Event::Presence { from, gone, .. } => {
                debug!(target: "otrchat::session", %from, gone, "presence");
            }
            Event::SubscriptionRequest { peer } => {
                info!(target: "otrchat::session", %peer, "subscription request");
            }
            Event::Subscribed { account, peer } => {
                info!(target: "otrchat::session", %account, %peer, "subscribed");
            }
            Event::Unsubscribed { account, peer } => {
                info!(target: "otrchat::session", %account, %peer, "unsubscribed");
            }
            Event::RegisterForm { title, .. } => {
                info!(target: "otrchat::session", %title, "registration form");
            }
        }
    }
}

/// Sink that forwards events into an unbounded channel.
///
/// This is how a UI thread or a test harness consumes events without doing
/// work on the session's call path.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Create a sink and the receiving half it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: Event) {
        // Receiver gone means nobody is listening anymore; that's fine.
        let _ = self.tx.send(event);
    }
}
