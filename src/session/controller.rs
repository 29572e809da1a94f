//! Per-session memory lifecycle.
//!
//! A controller is created for each voice session. It loads memory in the background
//! when the session starts, hands the context to the prompt exactly once, forwards turns
//! to the store without blocking the conversation, and serves the two memory tools.
//! It also remembers what the user is called, so stored messages carry their name.
//!
//! ```text
//! Idle ──begin──▶ Loading ──await_context──▶ Active ──close──▶ Closing ──▶ Closed
//!   └──────────── begin (memory off) ─────────▶┘
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::writer::{DeliveryStats, FlushOutcome, TurnWriter};
use crate::config::MemoryConfig;
use crate::memory::{
    assemble, extract_user_name, filter_facts, inject_into_prompt, name_from_text, Entity,
    Fact, KwamiId, MemoryBundle, MemoryContext, MemoryError, Role, SharedStore, Turn,
};

/// Most facts returned by one recall.
pub const RECALL_LIMIT: usize = 5;

/// Most preferences returned by `preferences`.
pub const PREFERENCES_LIMIT: usize = 20;

/// Entity type the graph uses for likes and dislikes.
const PREFERENCE_KIND: &str = "Preference";

/// Searches tried, in order, when looking up the user's name.
const NAME_QUERIES: &[&str] = &[
    "user name called identified",
    "my name is",
    "person identity who",
    "person preferences likes wants",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Loading,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Errors from the session-level memory operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Fact text is empty")]
    EmptyFact,

    #[error("Recall query is empty")]
    EmptyQuery,

    #[error("Session is {0}, not active")]
    NotActive(SessionState),

    #[error("Memory is disabled for this session")]
    MemoryDisabled,

    #[error(transparent)]
    Store(#[from] MemoryError),
}

/// Snapshot of a session for logs and the inspection API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub kwami_id: KwamiId,
    pub user_key: String,
    pub session_id: String,
    pub memory_enabled: bool,
    pub user_name: Option<String>,
    pub facts: usize,
    pub entities: usize,
    pub turns: usize,
    pub delivery: Option<DeliveryStats>,
}

/// What happened when a session closed.
#[derive(Debug, Clone, Serialize)]
pub struct CloseReport {
    pub session_id: String,
    pub turns: usize,
    /// True when a context fetch was still running and got cancelled
    pub fetch_aborted: bool,
    pub flush: Option<FlushOutcome>,
}

struct PendingFetch {
    handle: JoinHandle<Result<MemoryBundle, MemoryError>>,
    deadline: Instant,
}

pub struct SessionMemoryController {
    config: Arc<MemoryConfig>,
    store: Option<SharedStore>,
    kwami_id: KwamiId,
    user_key: String,
    session_id: String,
    state: SessionState,
    context: MemoryContext,
    pending: Option<PendingFetch>,
    inject_pending: bool,
    log: Vec<Turn>,
    next_seq: u64,
    writer: Option<TurnWriter>,
    user_name: Option<String>,
}

impl SessionMemoryController {
    pub fn new(config: Arc<MemoryConfig>, store: Option<SharedStore>, kwami_id: KwamiId) -> Self {
        let user_key = config.user_key(kwami_id.as_str());
        let session_id = config.new_session_id(&user_key);

        Self {
            config,
            store,
            kwami_id,
            user_key,
            session_id,
            state: SessionState::Idle,
            context: MemoryContext::default(),
            pending: None,
            inject_pending: false,
            log: Vec::new(),
            next_seq: 0,
            writer: None,
            user_name: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kwami_id(&self) -> &KwamiId {
        &self.kwami_id
    }

    /// Context currently held by the session.
    pub fn context(&self) -> &MemoryContext {
        &self.context
    }

    /// Turns recorded so far, in order.
    pub fn turns(&self) -> &[Turn] {
        &self.log
    }

    /// Name the user is known by, once learned.
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Set the user's name, e.g. from the client's profile. Blank names are ignored.
    pub fn set_user_name(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if self.user_name.as_deref() != Some(name) {
            tracing::info!("User name for {} set to {}", self.user_key, name);
        }
        self.user_name = Some(name.to_string());
    }

    fn learn_user_name(&mut self, facts: &[Fact]) {
        if self.user_name.is_some() {
            return;
        }
        if let Some(name) = extract_user_name(facts, &self.config.kwami_name) {
            tracing::info!("Found user name for {}: {}", self.user_key, name);
            self.user_name = Some(name);
        }
    }

    /// Memory is on when enabled in config and a store was provided.
    pub fn memory_enabled(&self) -> bool {
        self.config.enabled && self.store.is_some()
    }

    fn active_store(&self) -> Option<&SharedStore> {
        if self.config.enabled {
            self.store.as_ref()
        } else {
            None
        }
    }

    /// Start the session. Kicks off the context fetch and returns immediately.
    ///
    /// With memory off the session goes straight to `Active` with an empty context.
    pub fn begin(&mut self) {
        if self.state != SessionState::Idle {
            tracing::debug!("Session {} already started ({})", self.session_id, self.state);
            return;
        }

        let Some(store) = self.active_store().cloned() else {
            tracing::info!("Memory disabled for session {}", self.session_id);
            self.state = SessionState::Active;
            return;
        };

        let deadline = Instant::now() + self.config.fetch_timeout;
        let kwami_id = self.kwami_id.clone();
        let fetch_store = store.clone();
        let handle = tokio::spawn(async move { fetch_store.fetch_context(&kwami_id).await });

        self.pending = Some(PendingFetch { handle, deadline });
        self.writer = Some(TurnWriter::spawn(
            store,
            self.kwami_id.clone(),
            self.session_id.clone(),
        ));
        self.state = SessionState::Loading;
        tracing::debug!(
            "Loading memory for {} (session {})",
            self.user_key,
            self.session_id
        );
    }

    /// Wait for the context fetch, bounded by the fetch deadline set in `begin`.
    ///
    /// Any failure or timeout leaves the session `Active` with an empty context.
    pub async fn await_context(&mut self) -> &MemoryContext {
        if self.state != SessionState::Loading {
            return &self.context;
        }

        if let Some(PendingFetch {
            mut handle,
            deadline,
        }) = self.pending.take()
        {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(bundle))) => {
                    self.context = assemble(&bundle, &self.config);
                    self.learn_user_name(&bundle.facts);
                    tracing::info!(
                        "Loaded memory for {}: {} facts, {} entities, {} turns",
                        self.user_key,
                        self.context.facts.len(),
                        self.context.entities.len(),
                        self.context.recent_turns.len()
                    );
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!("Memory fetch failed, continuing without context: {}", e);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Memory fetch task failed: {}", e);
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        "Memory fetch exceeded {:?}, continuing without context",
                        self.config.fetch_timeout
                    );
                }
            }
        }

        self.inject_pending = true;
        self.state = SessionState::Active;
        &self.context
    }

    /// `begin` followed by `await_context`.
    pub async fn start(&mut self) -> &MemoryContext {
        self.begin();
        self.await_context().await
    }

    /// System prompt with the memory section, returned once per loaded context.
    ///
    /// Returns `None` when the context was already handed out or the session is not
    /// active yet.
    pub fn take_prompt_injection(&mut self, base_prompt: &str) -> Option<String> {
        if self.state != SessionState::Active || !self.inject_pending {
            return None;
        }
        self.inject_pending = false;
        Some(inject_into_prompt(
            base_prompt,
            &self.context,
            self.config.auto_inject_context,
        ))
    }

    /// Re-fetch context and make it available for one more injection.
    ///
    /// On failure the previous context is kept and nothing is re-injected.
    pub async fn request_refresh(&mut self) -> Result<&MemoryContext, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive(self.state));
        }
        let store = self.active_store().ok_or(SessionError::MemoryDisabled)?;

        let bundle = tokio::time::timeout(
            self.config.fetch_timeout,
            store.fetch_context(&self.kwami_id),
        )
        .await
        .map_err(|_| MemoryError::Timeout(self.config.fetch_timeout))??;

        self.context = assemble(&bundle, &self.config);
        self.learn_user_name(&bundle.facts);
        self.inject_pending = true;
        Ok(&self.context)
    }

    /// Record a finished turn and queue it for the store.
    ///
    /// Turns spoken while context is still loading are kept. Never waits on the
    /// network. Returns `None` before `begin`, after `close`, or for blank text.
    pub fn record_turn(&mut self, role: Role, text: &str) -> Option<&Turn> {
        if !matches!(self.state, SessionState::Loading | SessionState::Active) {
            tracing::debug!("Ignoring {} turn in {} session", role, self.state);
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if role == Role::User && self.user_name.is_none() {
            if let Some(name) = name_from_text(text, &self.config.kwami_name) {
                self.set_user_name(&name);
            }
        }

        let name = match role {
            Role::User => self.user_name.clone(),
            Role::Agent => None,
        };
        let turn = Turn::new(self.next_seq, role, text).with_name(name);
        self.next_seq += 1;

        if let Some(writer) = &self.writer {
            writer.enqueue(turn.clone());
        }
        self.log.push(turn);
        self.log.last()
    }

    /// Store a fact the user asked to be remembered. Returns the stored text.
    pub async fn remember_fact(&self, text: &str) -> Result<String, SessionError> {
        let fact = text.trim();
        if fact.is_empty() {
            return Err(SessionError::EmptyFact);
        }
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive(self.state));
        }
        let store = self.active_store().ok_or(SessionError::MemoryDisabled)?;

        store.store_fact(&self.kwami_id, fact).await?;
        tracing::info!("Stored fact for {}: {}", self.user_key, fact);
        Ok(fact.to_string())
    }

    /// Look up stored facts about a topic.
    ///
    /// Uses the same relevance filter as session start. Results are not added to the
    /// session log.
    pub async fn recall_memories(&self, query: &str) -> Result<Vec<Fact>, SessionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SessionError::EmptyQuery);
        }
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive(self.state));
        }
        let store = self.active_store().ok_or(SessionError::MemoryDisabled)?;

        let hits = store
            .search_facts(&self.kwami_id, query, RECALL_LIMIT * 2)
            .await?;
        let mut facts = filter_facts(
            &hits,
            self.config.min_fact_relevance,
            &self.config.kwami_name,
        );
        facts.truncate(RECALL_LIMIT);
        tracing::debug!("Recall '{}' returned {} facts", query, facts.len());
        Ok(facts)
    }

    /// Entities of one type, e.g. `Person` or `Place`, optionally matching `query`.
    pub async fn entities_of_type(
        &self,
        kind: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entity>, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive(self.state));
        }
        let store = self.active_store().ok_or(SessionError::MemoryDisabled)?;

        let kind = kind.trim();
        let kinds: Vec<String> = if kind.is_empty() {
            Vec::new()
        } else {
            vec![kind.to_string()]
        };
        let entities = store
            .search_entities(&self.kwami_id, query.trim(), &kinds, limit)
            .await?;
        tracing::debug!("Found {} {} entities", entities.len(), kind);
        Ok(entities)
    }

    /// The user's known likes and dislikes.
    pub async fn preferences(&self, limit: usize) -> Result<Vec<Entity>, SessionError> {
        self.entities_of_type(PREFERENCE_KIND, "", limit).await
    }

    /// Look the user's name up in the graph when the loaded context did not have it.
    ///
    /// Failed searches are skipped. Returns the cached name when one is already known.
    pub async fn resolve_user_name(&mut self) -> Result<Option<&str>, SessionError> {
        if self.user_name.is_none() {
            if self.state != SessionState::Active {
                return Err(SessionError::NotActive(self.state));
            }
            let store = self
                .active_store()
                .cloned()
                .ok_or(SessionError::MemoryDisabled)?;

            for query in NAME_QUERIES {
                match store.search_facts(&self.kwami_id, query, 10).await {
                    Ok(facts) => {
                        self.learn_user_name(&facts);
                        if self.user_name.is_some() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Name search '{}' failed: {}", query, e);
                    }
                }
            }
        }
        Ok(self.user_name.as_deref())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            kwami_id: self.kwami_id.clone(),
            user_key: self.user_key.clone(),
            session_id: self.session_id.clone(),
            memory_enabled: self.memory_enabled(),
            user_name: self.user_name.clone(),
            facts: self.context.facts.len(),
            entities: self.context.entities.len(),
            turns: self.log.len(),
            delivery: self.writer.as_ref().map(TurnWriter::stats),
        }
    }

    /// End the session.
    ///
    /// Cancels a pending fetch, gives queued turns the configured grace period, then
    /// releases everything the session held.
    pub async fn close(&mut self) -> CloseReport {
        if self.state == SessionState::Closed {
            return CloseReport {
                session_id: self.session_id.clone(),
                turns: 0,
                fetch_aborted: false,
                flush: None,
            };
        }
        self.state = SessionState::Closing;

        let fetch_aborted = match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                tracing::debug!("Cancelled memory fetch for session {}", self.session_id);
                true
            }
            None => false,
        };

        let flush = match self.writer.take() {
            Some(writer) => Some(writer.close(self.config.flush_grace).await),
            None => None,
        };

        let report = CloseReport {
            session_id: self.session_id.clone(),
            turns: self.log.len(),
            fetch_aborted,
            flush,
        };

        self.log = Vec::new();
        self.context = MemoryContext::default();
        self.inject_pending = false;
        self.state = SessionState::Closed;
        tracing::info!(
            "Closed session {} after {} turns",
            report.session_id,
            report.turns
        );
        report
    }
}

impl Drop for SessionMemoryController {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }
}
