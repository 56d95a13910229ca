//! Session policy configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy knobs for a [`SessionController`](crate::SessionController).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// When true, sending to a peer without an established secure channel
    /// starts a key negotiation and queues the message instead of letting it
    /// go out as cleartext.
    pub require_encryption: bool,
    /// Maximum number of plaintext messages queued per peer while a key
    /// negotiation is in flight. The oldest entries are dropped on overflow
    /// and a warning event is emitted; the send itself still succeeds.
    pub pending_limit: usize,
    /// How long a key negotiation may stay incomplete before the
    /// conversation is moved to the error state.
    pub ake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_encryption: false,
            pending_limit: 32,
            ake_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_permissive() {
        let config = SessionConfig::default();
        assert!(!config.require_encryption);
        assert!(config.pending_limit > 0);
        assert!(config.ake_timeout > Duration::ZERO);
    }
}
