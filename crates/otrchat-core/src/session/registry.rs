//! Registry of conversations for one account.
//!
//! The registry is the single owner of conversation state: lookups for the
//! same peer always resolve to the same instance, and creation is lazy.
//! Each conversation sits behind its own mutex so the inbound network path
//! and the user send path serialize per peer, not globally.

use super::conversation::ConversationState;
use crate::identity::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared handle to one peer's conversation.
pub type ConversationHandle = Arc<Mutex<ConversationState>>;

/// Lazily-populated map from peer to conversation.
#[derive(Clone, Default)]
pub struct ConversationRegistry {
    inner: Arc<RwLock<HashMap<PeerId, ConversationHandle>>>,
}

impl ConversationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the conversation for `peer`, creating it on first contact.
    ///
    /// Concurrent calls for the same peer return the identical instance;
    /// creation is serialized by the map's write lock.
    pub async fn get_or_create(&self, peer: &PeerId) -> ConversationHandle {
        {
            let map = self.inner.read().await;
            if let Some(existing) = map.get(peer) {
                return existing.clone();
            }
        }
        let mut map = self.inner.write().await;
        map.entry(peer.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(peer.clone()))))
            .clone()
    }

    /// Look up the conversation for `peer` without creating one.
    pub async fn get(&self, peer: &PeerId) -> Option<ConversationHandle> {
        self.inner.read().await.get(peer).cloned()
    }

    /// Remove the conversation for `peer`, returning it if present.
    pub async fn remove(&self, peer: &PeerId) -> Option<ConversationHandle> {
        self.inner.write().await.remove(peer)
    }

    /// Every known peer.
    pub async fn peers(&self) -> Vec<PeerId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Number of tracked conversations.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drain every conversation, used at account teardown.
    pub async fn clear(&self) -> Vec<(PeerId, ConversationHandle)> {
        self.inner.write().await.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_idempotent() {
        let registry = ConversationRegistry::new();
        let peer = PeerId::new("bob@example.org");

        let a = registry.get_or_create(&peer).await;
        let b = registry.get_or_create(&peer).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn get_does_not_create() {
        let registry = ConversationRegistry::new();
        assert!(registry.get(&PeerId::new("nobody@example.org")).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_instance() {
        let registry = ConversationRegistry::new();
        let peer = PeerId::new("bob@example.org");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let peer = peer.clone();
            handles.push(tokio::spawn(
                async move { registry.get_or_create(&peer).await },
            ));
        }

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.expect("task"));
        }
        let first = &instances[0];
        assert!(instances.iter().all(|i| Arc::ptr_eq(first, i)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let registry = ConversationRegistry::new();
        let bob = PeerId::new("bob@example.org");
        let eve = PeerId::new("eve@example.org");
        registry.get_or_create(&bob).await;
        registry.get_or_create(&eve).await;

        assert!(registry.remove(&bob).await.is_some());
        assert!(registry.remove(&bob).await.is_none());

        let drained = registry.clear().await;
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty().await);
    }
}
