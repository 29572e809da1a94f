//! HTTP API for inspecting memory.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/memory/{kwami_id}/facts?query=&limit=` - Stored facts, optionally by topic
//! - `GET /api/memory/{kwami_id}/context` - Context a new session would start with

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
