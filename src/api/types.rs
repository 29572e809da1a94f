//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::memory::{Entity, Fact, KwamiId, MemoryContext};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,

    /// Whether a memory backend is configured
    pub memory_enabled: bool,

    /// Backend name ("zep", "in-memory"), if any
    pub memory_backend: Option<String>,
}

/// Query parameters for fact lookup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactsQuery {
    /// Topic to search for; all current facts when absent
    pub query: Option<String>,

    /// Maximum number of facts to return
    pub limit: Option<usize>,
}

/// Facts stored for an identity.
#[derive(Debug, Clone, Serialize)]
pub struct FactsResponse {
    pub kwami_id: KwamiId,
    pub query: Option<String>,
    pub facts: Vec<Fact>,
}

/// The context a new session of this identity would start with.
#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub kwami_id: KwamiId,
    pub context: MemoryContext,

    /// Rendered prompt section, empty when there is nothing to inject
    pub prompt_block: String,
}

/// Query parameters for entity lookup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitiesQuery {
    /// Entity type such as `Person` or `Preference`; all types when absent
    #[serde(rename = "type")]
    pub kind: Option<String>,

    pub query: Option<String>,

    pub limit: Option<usize>,
}

/// Entities known for an identity.
#[derive(Debug, Clone, Serialize)]
pub struct EntitiesResponse {
    pub kwami_id: KwamiId,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub entities: Vec<Entity>,
}
