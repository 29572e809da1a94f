//! Voice-session side of memory: lifecycle, turn forwarding, tool calls.

mod controller;
mod writer;

use std::sync::Arc;

pub use controller::{
    CloseReport, SessionError, SessionMemoryController, SessionState, SessionStatus,
    PREFERENCES_LIMIT, RECALL_LIMIT,
};
pub use writer::{DeliveryStats, FlushOutcome, TurnWriter};

use crate::config::MemoryConfig;
use crate::memory::{KwamiId, SharedStore};

/// Process-wide memory handle. Hands out one controller per session.
#[derive(Clone)]
pub struct MemoryService {
    config: Arc<MemoryConfig>,
    store: Option<SharedStore>,
}

impl MemoryService {
    pub fn new(config: MemoryConfig, store: Option<SharedStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The backend, when memory is configured.
    pub fn store(&self) -> Option<&SharedStore> {
        if self.config.enabled {
            self.store.as_ref()
        } else {
            None
        }
    }

    /// New controller for a session of `kwami_id`. Not started yet.
    pub fn session(&self, kwami_id: impl Into<KwamiId>) -> SessionMemoryController {
        SessionMemoryController::new(self.config.clone(), self.store.clone(), kwami_id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, Role};

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        let service = MemoryService::new(MemoryConfig::default(), Some(store.clone()));

        let mut a = service.session("alice");
        let mut b = service.session("bob");
        a.start().await;
        b.start().await;
        assert_ne!(a.session_id(), b.session_id());

        a.record_turn(Role::User, "I live in Lisbon");
        b.record_turn(Role::User, "I live in Oslo");
        let a_id = a.session_id().to_string();
        let b_id = b.session_id().to_string();
        a.close().await;
        b.close().await;

        let alice = store.session_turns(&KwamiId::new("alice"), &a_id).await;
        let bob = store.session_turns(&KwamiId::new("bob"), &b_id).await;
        assert_eq!(alice.len(), 1);
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].text, "I live in Oslo");
    }

    #[test]
    fn test_disabled_service_hides_store() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let service = MemoryService::new(
            MemoryConfig {
                enabled: false,
                ..MemoryConfig::default()
            },
            Some(store),
        );
        assert!(service.store().is_none());
    }
}
