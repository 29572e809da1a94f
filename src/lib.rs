//! # Kwami Memory
//!
//! Long-term conversational memory for Kwami voice sessions.
//!
//! This library provides:
//! - A `MemoryStore` boundary to the Zep memory service (plus an in-memory backend)
//! - Per-session context loading, bounded so a slow service never delays the greeting
//! - Background turn persistence with a flush grace period on close
//! - The `remember_fact` / `recall_memories` tools
//! - A small HTTP API for inspecting what a Kwami remembers
//!
//! ## Session Flow
//! 1. `begin` starts the context fetch in the background
//! 2. `await_context` waits at most the fetch timeout, then the session is active
//! 3. The context is injected into the system prompt once
//! 4. Each finished turn is queued for the store
//! 5. `close` flushes queued turns within the grace period
//!
//! ## Modules
//! - `config`: Layered memory settings
//! - `memory`: Store trait, Zep client, context assembly
//! - `session`: Session controller and turn writer
//! - `tools`: Memory tools for the voice model
//! - `api`: Inspection endpoints

pub mod api;
pub mod config;
pub mod memory;
pub mod session;
pub mod tools;

pub use config::{Config, MemoryConfig};
pub use memory::{init_memory, MemoryStore, SharedStore};
pub use session::{MemoryService, SessionMemoryController};
