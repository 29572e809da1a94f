//! Memory store trait - implemented by all memory backends.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::MemoryError;
use super::types::{Entity, Fact, KwamiId, MemoryBundle, Turn};

/// Shared handle to a memory backend. Safe for concurrent use by independent sessions.
pub type SharedStore = Arc<dyn MemoryStore>;

/// Identity-keyed access to the external memory service.
///
/// All mutation lives in the backend; implementations hold no per-session state.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Check credentials. Called once at startup.
    async fn verify(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    /// Make sure the user and thread exist before the first append.
    ///
    /// Must be idempotent.
    async fn ensure_session(&self, _kwami_id: &KwamiId, _session_id: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    /// Fetch facts, entities and recent history for an identity.
    async fn fetch_context(&self, kwami_id: &KwamiId) -> Result<MemoryBundle, MemoryError>;

    /// Persist one conversation turn.
    async fn append_turn(
        &self,
        kwami_id: &KwamiId,
        session_id: &str,
        turn: &Turn,
    ) -> Result<(), MemoryError>;

    /// Persist a user turn together with the agent reply.
    ///
    /// Services extract better facts from whole exchanges. The default appends the
    /// turns one by one.
    async fn append_exchange(
        &self,
        kwami_id: &KwamiId,
        session_id: &str,
        turns: &[Turn],
    ) -> Result<(), MemoryError> {
        for turn in turns {
            self.append_turn(kwami_id, session_id, turn).await?;
        }
        Ok(())
    }

    /// Hand a fact to the service for extraction and storage.
    async fn store_fact(&self, kwami_id: &KwamiId, fact_text: &str) -> Result<(), MemoryError>;

    /// Scoped fact lookup for mid-conversation recall.
    async fn search_facts(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, MemoryError>;

    /// Entities whose kind is one of `kinds` (any kind when empty), best match first.
    async fn search_entities(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        kinds: &[String],
        limit: usize,
    ) -> Result<Vec<Entity>, MemoryError>;
}
