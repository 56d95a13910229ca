//! The session controller: orchestration of the send and receive paths.
//!
//! The controller is invoked concurrently from the network-delivery path and
//! the user send path. All mutation of a conversation happens under that
//! conversation's lock; events are collected during the mutation and
//! dispatched to sinks only after the lock is released, so a sink may call
//! straight back into the controller without deadlocking.

use super::conversation::{FingerprintChange, ProtocolState};
use super::registry::{ConversationHandle, ConversationRegistry};
use super::WireMessage;
use crate::config::SessionConfig;
use crate::engine::{CryptoEngine, ProtocolStep};
use crate::error::{Error, Result};
use crate::event::{Event, EventSink, SinkSet};
use crate::identity::{AccountId, PeerId};
use crate::logging::RedactedFingerprint;
use crate::session::ConversationSnapshot;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a send operation.
#[derive(Debug)]
pub enum SendOutcome {
    /// The message was encrypted and must be written to the wire.
    Sent(WireMessage),
    /// The message goes out unencrypted, per policy.
    Cleartext(WireMessage),
    /// The message was queued behind an in-flight key negotiation.
    Queued {
        /// Initial negotiation message to put on the wire, when this send
        /// triggered one.
        negotiation: Option<WireMessage>,
    },
}

/// Result of explicitly starting a key negotiation.
#[derive(Debug)]
pub enum AkeStart {
    /// A negotiation began; write this to the wire.
    Initiated(WireMessage),
    /// A negotiation is already in flight; nothing to do.
    AlreadyInProgress,
    /// The channel is already encrypted; nothing to do.
    AlreadyEncrypted,
}

/// Per-account conversation session manager.
///
/// Owns the conversation registry, drives the [`CryptoEngine`] and fans
/// events out to installed sinks.
pub struct SessionController {
    account: AccountId,
    engine: Arc<dyn CryptoEngine>,
    registry: ConversationRegistry,
    sinks: SinkSet,
    config: SessionConfig,
}

impl SessionController {
    /// Create a controller for `account` over `engine`.
    pub fn new(account: AccountId, engine: Arc<dyn CryptoEngine>, config: SessionConfig) -> Self {
        Self {
            account,
            engine,
            registry: ConversationRegistry::new(),
            sinks: SinkSet::new(),
            config,
        }
    }

    /// The local account this controller serves.
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// The active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The conversation registry. Exposed for diagnostics and teardown.
    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Install an event sink. All subsequent events reach it.
    pub fn install_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.install(sink);
    }

    /// Send a message to `peer`.
    ///
    /// Depending on conversation state and policy the message is encrypted,
    /// sent as marked cleartext, or queued behind a key negotiation. A
    /// failed encryption leaves the conversation untouched and never falls
    /// back to cleartext.
    pub async fn send(&self, peer: &PeerId, body: &str) -> Result<SendOutcome> {
        let conv = self.registry.get_or_create(peer).await;
        let mut events = Vec::new();
        let mut armed_generation = None;

        let result = {
            let mut conv = conv.lock().await;
            match conv.state() {
                ProtocolState::Encrypted => match self.engine.encrypt(peer, body.as_bytes()) {
                    Ok(bytes) => {
                        events.push(self.echo(body, true));
                        Ok(SendOutcome::Sent(WireMessage::new(peer.clone(), bytes)))
                    }
                    Err(err) => {
                        events.push(Event::Warn(format!(
                            "could not encrypt message for {peer}; nothing was sent"
                        )));
                        Err(err)
                    }
                },
                ProtocolState::AwaitingAke => {
                    let dropped = conv.enqueue(body.to_string(), self.config.pending_limit);
                    if dropped > 0 {
                        events.push(Event::Warn(format!(
                            "outbound queue for {peer} overflowed; dropped {dropped} oldest message(s)"
                        )));
                    }
                    debug!(%peer, queued = conv.pending_len(), "message queued behind key negotiation");
                    Ok(SendOutcome::Queued { negotiation: None })
                }
                ProtocolState::Plaintext | ProtocolState::Finished | ProtocolState::Error => {
                    if self.config.require_encryption {
                        // Policy says never send cleartext: negotiate first
                        // and queue the message.
                        match self.engine.start_ake(peer) {
                            Ok(bytes) => {
                                conv.set_state(ProtocolState::AwaitingAke);
                                armed_generation = Some(conv.begin_ake());
                                let dropped =
                                    conv.enqueue(body.to_string(), self.config.pending_limit);
                                if dropped > 0 {
                                    events.push(Event::Warn(format!(
                                        "outbound queue for {peer} overflowed; dropped {dropped} oldest message(s)"
                                    )));
                                }
                                events.push(Event::Info(format!(
                                    "negotiating a secure channel with {peer}"
                                )));
                                Ok(SendOutcome::Queued {
                                    negotiation: Some(WireMessage::new(peer.clone(), bytes)),
                                })
                            }
                            Err(err) => {
                                events.push(Event::Warn(format!(
                                    "could not start key negotiation with {peer}"
                                )));
                                Err(err)
                            }
                        }
                    } else {
                        events.push(self.echo(body, false));
                        Ok(SendOutcome::Cleartext(WireMessage::new(
                            peer.clone(),
                            body.as_bytes().to_vec(),
                        )))
                    }
                }
            }
        };

        if let Some(generation) = armed_generation {
            self.arm_ake_timeout(peer.clone(), conv.clone(), generation);
        }
        self.sinks.dispatch_all(events);
        result
    }

    /// Process inbound wire bytes from `peer`.
    ///
    /// Returns the wire messages to write back: key exchange replies, plus
    /// any queued plaintext flushed once the channel became encrypted.
    pub async fn receive(&self, peer: &PeerId, bytes: &[u8]) -> Result<Vec<WireMessage>> {
        let conv = self.registry.get_or_create(peer).await;
        let mut events = Vec::new();
        let mut wires = Vec::new();
        let mut armed_generation = None;

        let result = {
            let mut conv = conv.lock().await;
            match self.engine.interpret(peer, bytes) {
                Ok(ProtocolStep::Plaintext(body)) => {
                    events.push(Event::MessageReceived {
                        from: peer.clone(),
                        timestamp: Utc::now(),
                        encrypted: false,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                    Ok(())
                }
                Ok(ProtocolStep::Decrypted(body)) => {
                    match conv.state() {
                        // Terminal for the current session key: nothing may
                        // be decrypted until a fresh negotiation completes.
                        ProtocolState::Finished | ProtocolState::Error => {
                            events.push(Event::Warn(format!(
                                "dropped encrypted traffic from {peer}; the secure session is not active"
                            )));
                        }
                        _ => {
                            events.push(Event::MessageReceived {
                                from: peer.clone(),
                                timestamp: Utc::now(),
                                encrypted: true,
                                body: String::from_utf8_lossy(&body).into_owned(),
                            });
                        }
                    }
                    Ok(())
                }
                Ok(ProtocolStep::ControlConsumed { reply }) => {
                    if let Some(bytes) = reply {
                        wires.push(WireMessage::new(peer.clone(), bytes));
                    }
                    Ok(())
                }
                Ok(ProtocolStep::AkeAdvanced { established, reply }) => {
                    if let Some(bytes) = reply {
                        wires.push(WireMessage::new(peer.clone(), bytes));
                    }
                    if established {
                        self.on_established(peer, &mut conv, &mut events, &mut wires);
                    } else if conv.state() != ProtocolState::AwaitingAke {
                        conv.set_state(ProtocolState::AwaitingAke);
                        armed_generation = Some(conv.begin_ake());
                    }
                    Ok(())
                }
                Ok(ProtocolStep::Terminated) => {
                    conv.set_state(ProtocolState::Finished);
                    let discarded = conv.clear_pending();
                    if discarded > 0 {
                        events.push(Event::Warn(format!(
                            "{peer} ended the secure session; {discarded} queued message(s) discarded"
                        )));
                    }
                    events.push(Event::Info(format!("{peer} ended the secure session")));
                    Ok(())
                }
                Err(err) => {
                    if err.poisons_session() {
                        conv.set_state(ProtocolState::Error);
                        events.push(Event::Warn(format!(
                            "secure session with {peer} failed: {err}"
                        )));
                    } else {
                        // Undecryptable traffic: drop the message, keep the
                        // session. Never surface partial plaintext.
                        events.push(Event::Warn(format!(
                            "dropped an undecryptable message from {peer}"
                        )));
                    }
                    Err(err)
                }
            }
        };

        if let Some(generation) = armed_generation {
            self.arm_ake_timeout(peer.clone(), conv.clone(), generation);
        }
        self.sinks.dispatch_all(events);
        result.map(|()| wires)
    }

    /// Handle a newly established session key: fingerprint bookkeeping and
    /// flushing the pending queue. Runs under the conversation lock.
    fn on_established(
        &self,
        peer: &PeerId,
        conv: &mut crate::session::ConversationState,
        events: &mut Vec<Event>,
        wires: &mut Vec<WireMessage>,
    ) {
        if let Some(fingerprint) = self.engine.fingerprint(peer) {
            match conv.observe_fingerprint(fingerprint.clone()) {
                FingerprintChange::Unchanged => {}
                FingerprintChange::Established => {
                    info!(%peer, fingerprint = %RedactedFingerprint(&fingerprint), "new conversation keys");
                    events.push(Event::NewKeys {
                        peer: peer.clone(),
                        fingerprint,
                    });
                }
                FingerprintChange::Changed => {
                    warn!(%peer, "peer key changed; verification cleared");
                    events.push(Event::Alert(format!(
                        "the key for {peer} has changed; verify the new fingerprint"
                    )));
                    events.push(Event::NewKeys {
                        peer: peer.clone(),
                        fingerprint,
                    });
                }
            }
        }

        conv.set_state(ProtocolState::Encrypted);

        // Flush messages queued while the negotiation ran, oldest first. A
        // failing encrypt discards the rest of the queue rather than leaving
        // messages stranded behind newer traffic; the warning carries the
        // count.
        let drained = conv.drain_pending();
        let total = drained.len();
        for (flushed, body) in drained.into_iter().enumerate() {
            match self.engine.encrypt(peer, body.as_bytes()) {
                Ok(bytes) => {
                    wires.push(WireMessage::new(peer.clone(), bytes));
                    events.push(self.echo(&body, true));
                }
                Err(_) => {
                    let discarded = total - flushed;
                    events.push(Event::Warn(format!(
                        "could not encrypt queued messages to {peer}; {discarded} message(s) discarded"
                    )));
                    break;
                }
            }
        }
    }

    /// Explicitly start a key negotiation with `peer`.
    ///
    /// Valid from the plaintext, finished, and error states. While a
    /// negotiation is in flight or a channel is already encrypted this is a
    /// benign no-op, not an error.
    pub async fn start_ake(&self, peer: &PeerId) -> Result<AkeStart> {
        let conv = self.registry.get_or_create(peer).await;
        let mut events = Vec::new();
        let mut armed_generation = None;

        let result = {
            let mut conv = conv.lock().await;
            match conv.state() {
                ProtocolState::AwaitingAke => Ok(AkeStart::AlreadyInProgress),
                ProtocolState::Encrypted => Ok(AkeStart::AlreadyEncrypted),
                ProtocolState::Plaintext | ProtocolState::Finished | ProtocolState::Error => {
                    match self.engine.start_ake(peer) {
                        Ok(bytes) => {
                            conv.set_state(ProtocolState::AwaitingAke);
                            armed_generation = Some(conv.begin_ake());
                            events.push(Event::Info(format!(
                                "negotiating a secure channel with {peer}"
                            )));
                            Ok(AkeStart::Initiated(WireMessage::new(peer.clone(), bytes)))
                        }
                        Err(err) => {
                            events.push(Event::Warn(format!(
                                "could not start key negotiation with {peer}"
                            )));
                            Err(err)
                        }
                    }
                }
            }
        };

        if let Some(generation) = armed_generation {
            self.arm_ake_timeout(peer.clone(), conv.clone(), generation);
        }
        self.sinks.dispatch_all(events);
        result
    }

    /// End the secure session with `peer`.
    ///
    /// Key material is discarded, queued messages are dropped (no partial
    /// flush) and the conversation returns to plaintext. Fingerprint
    /// verification survives: trust in a key is not forgotten by hanging up.
    /// The returned wire message, when present, tells the peer the channel
    /// ended; the transport must deliver it.
    pub async fn end_session(&self, peer: &PeerId) -> Result<Option<WireMessage>> {
        let conv = self.registry.get(peer).await.ok_or(Error::UnknownPeer)?;
        let (farewell, discarded) = {
            let mut conv = conv.lock().await;
            let farewell = self.engine.end_session(peer);
            conv.set_state(ProtocolState::Plaintext);
            (farewell, conv.clear_pending())
        };

        if discarded > 0 {
            self.sinks.dispatch(Event::Warn(format!(
                "ended session with {peer}; {discarded} queued message(s) discarded"
            )));
        }
        self.sinks
            .dispatch(Event::Info(format!("ended secure session with {peer}")));
        Ok(farewell.map(|bytes| WireMessage::new(peer.clone(), bytes)))
    }

    /// Mark the current fingerprint for `peer` as user-verified.
    pub async fn verify(&self, peer: &PeerId) -> Result<()> {
        let conv = self.registry.get(peer).await.ok_or(Error::UnknownPeer)?;
        {
            let mut conv = conv.lock().await;
            conv.mark_verified()?;
        }
        self.sinks.dispatch(Event::Info(format!(
            "fingerprint for {peer} marked as verified"
        )));
        Ok(())
    }

    /// Clear fingerprint verification for `peer`. Always succeeds.
    pub async fn unverify(&self, peer: &PeerId) {
        if let Some(conv) = self.registry.get(peer).await {
            conv.lock().await.clear_verified();
            self.sinks.dispatch(Event::Info(format!(
                "fingerprint for {peer} no longer verified"
            )));
        }
    }

    /// Lock-free snapshot of a conversation for display.
    pub async fn snapshot(&self, peer: &PeerId) -> Option<ConversationSnapshot> {
        let conv = self.registry.get(peer).await?;
        let conv = conv.lock().await;
        Some(conv.snapshot())
    }

    /// Tear down every conversation: cancel in-flight negotiations, discard
    /// key material and queued messages. Used at account sign-off.
    pub async fn teardown(&self) {
        let drained = self.registry.clear().await;
        for (peer, conv) in drained {
            // The transport is going away with us; farewell frames have
            // nowhere to go.
            let _ = self.engine.end_session(&peer);
            let mut conv = conv.lock().await;
            conv.set_state(ProtocolState::Plaintext);
            conv.clear_pending();
        }
        info!(account = %self.account, "all conversations torn down");
        self.sinks.dispatch(Event::Info(format!(
            "account {} signed off",
            self.account
        )));
    }

    /// Forward a presence update from the roster layer to the sinks.
    pub fn presence_update(
        &self,
        from: &PeerId,
        show: &str,
        status: &str,
        gone: bool,
    ) {
        self.sinks.dispatch(Event::Presence {
            from: from.clone(),
            to: self.account.clone(),
            show: show.to_string(),
            status: status.to_string(),
            gone,
        });
    }

    /// Forward a presence subscription request to the sinks.
    pub fn subscription_request(&self, peer: &PeerId) {
        self.sinks
            .dispatch(Event::SubscriptionRequest { peer: peer.clone() });
    }

    /// Forward a granted subscription to the sinks.
    pub fn subscribed(&self, peer: &PeerId) {
        self.sinks.dispatch(Event::Subscribed {
            account: self.account.clone(),
            peer: peer.clone(),
        });
    }

    /// Forward a removed subscription to the sinks.
    pub fn unsubscribed(&self, peer: &PeerId) {
        self.sinks.dispatch(Event::Unsubscribed {
            account: self.account.clone(),
            peer: peer.clone(),
        });
    }

    /// Forward an in-band registration form to the sinks.
    pub fn registration_form(&self, title: &str, instructions: &str, fields: Vec<String>) {
        self.sinks.dispatch(Event::RegisterForm {
            title: title.to_string(),
            instructions: instructions.to_string(),
            fields,
        });
    }

    /// Local echo for a message we sent, so the UI displays exactly what
    /// went out without re-decrypting its own ciphertext.
    fn echo(&self, body: &str, encrypted: bool) -> Event {
        Event::MessageReceived {
            from: PeerId::new(self.account.as_str()),
            timestamp: Utc::now(),
            encrypted,
            body: body.to_string(),
        }
    }

    /// Watchdog for a negotiation that never completes: after the configured
    /// timeout, a conversation still awaiting the same negotiation
    /// generation moves to the error state.
    fn arm_ake_timeout(&self, peer: PeerId, conv: ConversationHandle, generation: u64) {
        let sinks = self.sinks.clone();
        let timeout = self.config.ake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let timed_out = {
                let mut conv = conv.lock().await;
                if conv.state() == ProtocolState::AwaitingAke
                    && conv.ake_generation() == generation
                {
                    conv.set_state(ProtocolState::Error);
                    true
                } else {
                    false
                }
            };
            if timed_out {
                warn!(%peer, "key negotiation timed out");
                sinks.dispatch(Event::Warn(format!(
                    "key negotiation with {peer} timed out"
                )));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::X25519Engine;
    use crate::event::ChannelSink;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn controller() -> (SessionController, UnboundedReceiver<Event>) {
        let controller = SessionController::new(
            AccountId::new("alice@example.org"),
            Arc::new(X25519Engine::new()),
            SessionConfig::default(),
        );
        let (sink, rx) = ChannelSink::new();
        controller.install_sink(Arc::new(sink));
        (controller, rx)
    }

    #[tokio::test]
    async fn cleartext_send_echoes_unencrypted() {
        let (controller, mut rx) = controller();
        let bob = PeerId::new("bob@example.org");

        let outcome = controller.send(&bob, "hi there").await.expect("send");
        match outcome {
            SendOutcome::Cleartext(wire) => {
                assert_eq!(wire.peer, bob);
                assert_eq!(wire.bytes, b"hi there");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        match rx.try_recv().expect("echo") {
            Event::MessageReceived {
                from, encrypted, body, ..
            } => {
                assert_eq!(from.as_str(), "alice@example.org");
                assert!(!encrypted);
                assert_eq!(body, "hi there");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_unknown_peer_fails() {
        let (controller, _rx) = controller();
        let ghost = PeerId::new("ghost@example.org");
        assert!(matches!(
            controller.verify(&ghost).await,
            Err(Error::UnknownPeer)
        ));
    }

    #[tokio::test]
    async fn unverify_unknown_peer_is_silent() {
        let (controller, mut rx) = controller();
        controller.unverify(&PeerId::new("ghost@example.org")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_helpers_dispatch_events() {
        let (controller, mut rx) = controller();
        let bob = PeerId::new("bob@example.org");

        controller.presence_update(&bob, "away", "lunch", false);
        controller.subscription_request(&bob);
        controller.subscribed(&bob);
        controller.unsubscribed(&bob);
        controller.registration_form("Sign up", "Fill this in", vec!["username".into()]);

        assert!(matches!(rx.try_recv().expect("ev"), Event::Presence { gone: false, .. }));
        assert!(matches!(rx.try_recv().expect("ev"), Event::SubscriptionRequest { .. }));
        assert!(matches!(rx.try_recv().expect("ev"), Event::Subscribed { .. }));
        assert!(matches!(rx.try_recv().expect("ev"), Event::Unsubscribed { .. }));
        assert!(matches!(rx.try_recv().expect("ev"), Event::RegisterForm { .. }));
    }

    #[tokio::test]
    async fn snapshot_of_unknown_peer_is_none() {
        let (controller, _rx) = controller();
        assert!(controller
            .snapshot(&PeerId::new("ghost@example.org"))
            .await
            .is_none());
    }
}
