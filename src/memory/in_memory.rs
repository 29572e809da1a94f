//! In-memory memory store (non-persistent).
//!
//! Used for offline development and tests. Supports injected latency and outages so
//! session behaviour under a slow or failing service can be exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::MemoryError;
use super::store::MemoryStore;
use super::types::{Entity, Fact, KwamiId, MemoryBundle, Turn};

/// Most turns returned by `fetch_context`.
const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default)]
struct Namespace {
    summary: Option<String>,
    facts: Vec<Fact>,
    entities: Vec<Entity>,
    /// session id -> turns in append order
    sessions: HashMap<String, Vec<Turn>>,
}

pub struct InMemoryStore {
    namespaces: RwLock<HashMap<KwamiId, Namespace>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
    fetch_delay: Option<Duration>,
    append_delay: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            fetch_delay: None,
            append_delay: None,
        }
    }

    /// Delay every `fetch_context` and `search_facts` call.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Delay every `append_turn` call.
    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = Some(delay);
        self
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of trait calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Replace the stored memory for an identity.
    pub async fn seed(&self, kwami_id: &KwamiId, bundle: MemoryBundle) {
        let mut namespaces = self.namespaces.write().await;
        let ns = namespaces.entry(kwami_id.clone()).or_default();
        ns.summary = bundle.summary;
        ns.facts = bundle.facts;
        ns.entities = bundle.entities;
        if !bundle.history.is_empty() {
            ns.sessions.insert("seed".to_string(), bundle.history);
        }
    }

    /// Turns recorded for one session, in append order.
    pub async fn session_turns(&self, kwami_id: &KwamiId, session_id: &str) -> Vec<Turn> {
        self.namespaces
            .read()
            .await
            .get(kwami_id)
            .and_then(|ns| ns.sessions.get(session_id))
            .cloned()
            .unwrap_or_default()
    }

    /// All facts stored for an identity.
    pub async fn facts(&self, kwami_id: &KwamiId) -> Vec<Fact> {
        self.namespaces
            .read()
            .await
            .get(kwami_id)
            .map(|ns| ns.facts.clone())
            .unwrap_or_default()
    }

    async fn enter(&self, delay: Option<Duration>) -> Result<(), MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MemoryError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn ensure_session(&self, kwami_id: &KwamiId, session_id: &str) -> Result<(), MemoryError> {
        self.enter(None).await?;
        self.namespaces
            .write()
            .await
            .entry(kwami_id.clone())
            .or_default()
            .sessions
            .entry(session_id.to_string())
            .or_default();
        Ok(())
    }

    async fn fetch_context(&self, kwami_id: &KwamiId) -> Result<MemoryBundle, MemoryError> {
        self.enter(self.fetch_delay).await?;
        let namespaces = self.namespaces.read().await;
        let Some(ns) = namespaces.get(kwami_id) else {
            return Ok(MemoryBundle::default());
        };

        let mut history: Vec<Turn> = ns.sessions.values().flatten().cloned().collect();
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
        let start = history.len().saturating_sub(HISTORY_LIMIT);

        Ok(MemoryBundle {
            summary: ns.summary.clone(),
            facts: ns.facts.clone(),
            entities: ns.entities.clone(),
            history: history.split_off(start),
        })
    }

    async fn append_turn(
        &self,
        kwami_id: &KwamiId,
        session_id: &str,
        turn: &Turn,
    ) -> Result<(), MemoryError> {
        self.enter(self.append_delay).await?;
        self.namespaces
            .write()
            .await
            .entry(kwami_id.clone())
            .or_default()
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn append_exchange(
        &self,
        kwami_id: &KwamiId,
        session_id: &str,
        turns: &[Turn],
    ) -> Result<(), MemoryError> {
        self.enter(self.append_delay).await?;
        self.namespaces
            .write()
            .await
            .entry(kwami_id.clone())
            .or_default()
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .extend(turns.iter().cloned());
        Ok(())
    }

    async fn store_fact(&self, kwami_id: &KwamiId, fact_text: &str) -> Result<(), MemoryError> {
        self.enter(None).await?;
        self.namespaces
            .write()
            .await
            .entry(kwami_id.clone())
            .or_default()
            .facts
            .push(Fact::new(fact_text, 1.0));
        Ok(())
    }

    async fn search_facts(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, MemoryError> {
        self.enter(self.fetch_delay).await?;
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let namespaces = self.namespaces.read().await;
        let Some(ns) = namespaces.get(kwami_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<Fact> = ns
            .facts
            .iter()
            .filter_map(|fact| {
                let words = tokenize(&fact.text);
                let hits = terms.iter().filter(|t| words.contains(t)).count();
                if hits == 0 {
                    return None;
                }
                let mut hit = fact.clone();
                hit.relevance = hits as f64 / terms.len() as f64;
                Some(hit)
            })
            .collect();
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn search_entities(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        kinds: &[String],
        limit: usize,
    ) -> Result<Vec<Entity>, MemoryError> {
        self.enter(self.fetch_delay).await?;
        let terms = tokenize(query);
        let namespaces = self.namespaces.read().await;
        let Some(ns) = namespaces.get(kwami_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(usize, &Entity)> = ns
            .entities
            .iter()
            .filter(|e| kinds.is_empty() || kinds.iter().any(|k| k.eq_ignore_ascii_case(&e.kind)))
            .map(|e| {
                let words = tokenize(&format!("{} {}", e.name, e.summary));
                (terms.iter().filter(|t| words.contains(t)).count(), e)
            })
            .filter(|(hits, _)| terms.is_empty() || *hits > 0)
            .collect();
        // Stable, so equal scores keep insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}
