//! Account: the top-level handle tying an identity to its session manager.

use crate::config::SessionConfig;
use crate::engine::CryptoEngine;
use crate::identity::AccountId;
use crate::session::SessionController;
use std::sync::Arc;

/// A signed-in account and its conversation session manager.
///
/// The engine is consumed at construction: after sign-in the account is the
/// only path to the key material, and signing off tears every conversation
/// down through it.
pub struct Account {
    id: AccountId,
    controller: Arc<SessionController>,
}

impl Account {
    /// Sign in: bind `id` to `engine` under the given configuration.
    pub fn sign_in(id: AccountId, engine: Arc<dyn CryptoEngine>, config: SessionConfig) -> Self {
        let controller = Arc::new(SessionController::new(id.clone(), engine, config));
        Self { id, controller }
    }

    /// The account's identity.
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    /// The session controller for this account.
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Sign off: end every conversation and discard session key material.
    pub async fn sign_off(&self) {
        self.controller.teardown().await;
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Account({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::X25519Engine;
    use crate::event::{ChannelSink, Event};
    use crate::identity::PeerId;

    #[tokio::test]
    async fn sign_off_drains_conversations() {
        let account = Account::sign_in(
            AccountId::new("alice@example.org"),
            Arc::new(X25519Engine::new()),
            SessionConfig::default(),
        );
        let (sink, mut rx) = ChannelSink::new();
        account.controller().install_sink(Arc::new(sink));

        let controller = account.controller();
        controller
            .send(&PeerId::new("bob@example.org"), "hello")
            .await
            .expect("send");
        assert_eq!(controller.registry().len().await, 1);
        let _ = rx.try_recv();

        account.sign_off().await;
        assert!(controller.registry().is_empty().await);
        assert!(matches!(rx.try_recv().expect("event"), Event::Info(_)));
    }
}
