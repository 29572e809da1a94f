//! Long-term conversational memory.
//!
//! This module provides:
//! - The `MemoryStore` boundary to the external memory service, with a Zep client and an
//!   in-memory backend for offline use
//! - Context assembly: turning a raw memory bundle into a bounded prompt section
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐  fetch_context  ┌──────────────┐
//! │ SessionController │────────────────▶│ MemoryStore  │──▶ Zep Cloud
//! └─────────┬─────────┘  append_turn    └──────────────┘
//!           │            store_fact
//!           ▼
//!   ┌───────────────┐
//!   │   assemble    │──▶ MemoryContext ──▶ system prompt
//!   └───────────────┘
//! ```

mod context;
mod error;
mod identity;
mod in_memory;
mod store;
mod types;
mod zep;

use std::sync::Arc;

pub use context::{
    assemble, filter_facts, inject_into_prompt, is_assistant_fact, safe_truncate_index,
    MemoryContext, MAX_ENTITIES, MAX_FACTS, MAX_TURN_BYTES,
};
pub use error::{classify_http_status, MemoryError, MemoryErrorKind};
pub use identity::{extract_user_name, name_from_text};
pub use in_memory::InMemoryStore;
pub use store::{MemoryStore, SharedStore};
pub use types::*;
pub use zep::ZepClient;

use crate::config::MemoryConfig;

/// Initialize the memory backend from resolved settings.
///
/// Returns `Ok(None)` when memory is disabled or has no API key. Rejected credentials
/// are fatal; an unreachable service only degrades memory for now.
pub async fn init_memory(config: &MemoryConfig) -> Result<Option<SharedStore>, MemoryError> {
    if !config.enabled {
        tracing::info!("Memory disabled by configuration");
        return Ok(None);
    }
    if !config.is_enabled() {
        tracing::warn!("Memory enabled but no ZEP_API_KEY set; running without memory");
        return Ok(None);
    }

    let client = ZepClient::from_config(config)?;
    match client.verify().await {
        Ok(()) => {
            tracing::info!("Memory service verified at {}", config.base_url);
        }
        Err(e @ MemoryError::Unauthorized(_)) => return Err(e),
        Err(e) => {
            tracing::warn!("Memory service not reachable at startup: {}", e);
        }
    }

    Ok(Some(Arc::new(client)))
}
