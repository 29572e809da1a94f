//! Zep client for thread and knowledge-graph APIs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::error::MemoryError;
use super::store::MemoryStore;
use super::types::{clamp_relevance, Entity, Fact, KwamiId, MemoryBundle, Role, Turn};
use crate::config::MemoryConfig;

/// Query used to pull general user facts at session start.
const FACTS_QUERY: &str = "user information preferences interests goals";

const FACTS_LIMIT: usize = 20;
const ENTITIES_LIMIT: usize = 10;
/// Most messages pulled from the latest thread.
const HISTORY_LIMIT: usize = 50;

/// Zep client for memory operations.
pub struct ZepClient {
    client: Client,
    base_url: String,
    api_key: String,
    user_id_override: Option<String>,
    kwami_name: String,
    /// Floor passed to the thread summary endpoint
    min_relevance: f64,
    request_timeout: Duration,
}

impl ZepClient {
    /// Create a new Zep client.
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, MemoryError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MemoryError::Unavailable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            user_id_override: None,
            kwami_name: "Kwami".to_string(),
            min_relevance: 0.5,
            request_timeout,
        })
    }

    /// Create a client from resolved memory settings.
    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| MemoryError::Unauthorized("no API key configured".to_string()))?;
        let mut client = Self::new(&config.base_url, api_key, config.request_timeout)?;
        client.user_id_override = config.user_id.clone();
        client.kwami_name = config.kwami_name.clone();
        client.min_relevance = config.min_fact_relevance;
        Ok(client)
    }

    /// Zep user key for a Kwami identity.
    fn user_key(&self, kwami_id: &KwamiId) -> String {
        self.user_id_override
            .clone()
            .unwrap_or_else(|| format!("kwami_{}", kwami_id))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Api-Key {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    /// Send a request and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, MemoryError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| MemoryError::from_transport(e, self.request_timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| MemoryError::from_transport(e, self.request_timeout))?;

        if !status.is_success() {
            return Err(MemoryError::from_status(status.as_u16(), &text));
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Send a request whose response body is irrelevant.
    async fn send(&self, req: RequestBuilder) -> Result<StatusCode, MemoryError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| MemoryError::from_transport(e, self.request_timeout))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(status);
        }

        let text = resp.text().await.unwrap_or_default();
        Err(MemoryError::from_status(status.as_u16(), &text))
    }

    // ==================== Users & threads ====================

    async fn ensure_user(&self, kwami_id: &KwamiId, user_key: &str) -> Result<(), MemoryError> {
        let existing = self
            .authed(
                self.client
                    .get(self.url(&format!("/users/{}", urlencoding::encode(user_key)))),
            )
            .send()
            .await
            .map_err(|e| MemoryError::from_transport(e, self.request_timeout))?;

        match existing.status() {
            s if s.is_success() => {
                tracing::debug!("Zep user {} already exists", user_key);
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            s => {
                let text = existing.text().await.unwrap_or_default();
                return Err(MemoryError::from_status(s.as_u16(), &text));
            }
        }

        let body = json!({
            "user_id": user_key,
            "metadata": {
                "kwami_id": kwami_id.as_str(),
                "assistant_name": self.kwami_name,
                "created_at": Utc::now().to_rfc3339(),
            }
        });

        match self.send(self.client.post(self.url("/users")).json(&body)).await {
            Ok(_) => {
                tracing::info!("Created Zep user: {}", user_key);
                Ok(())
            }
            // Another session created it first
            Err(MemoryError::Unavailable(msg)) if is_already_exists(&msg) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_thread(&self, user_key: &str, session_id: &str) -> Result<(), MemoryError> {
        let body = json!({
            "thread_id": session_id,
            "user_id": user_key,
        });

        match self.send(self.client.post(self.url("/threads")).json(&body)).await {
            Ok(_) => {
                tracing::info!("Created Zep thread: {}", session_id);
                Ok(())
            }
            Err(MemoryError::Unavailable(msg)) if is_already_exists(&msg) => {
                tracing::debug!("Zep thread {} already exists", session_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn latest_thread(&self, user_key: &str) -> Result<Option<String>, MemoryError> {
        let threads: Vec<ZepThread> = self
            .send_json(self.client.get(self.url(&format!(
                "/users/{}/threads",
                urlencoding::encode(user_key)
            ))))
            .await?;

        Ok(threads
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .map(|t| t.thread_id))
    }

    async fn thread_messages(&self, thread_id: &str) -> Result<Vec<Turn>, MemoryError> {
        let resp: ZepMessages = self
            .send_json(self.client.get(self.url(&format!(
                "/threads/{}/messages?lastn={}",
                urlencoding::encode(thread_id),
                HISTORY_LIMIT
            ))))
            .await?;

        Ok(resp
            .messages
            .into_iter()
            .enumerate()
            .filter(|(_, m)| !m.content.trim().is_empty())
            .map(|(i, m)| {
                let role = m
                    .role_type
                    .as_deref()
                    .or(m.role.as_deref())
                    .and_then(|r| r.parse::<Role>().ok())
                    .unwrap_or(Role::User);
                Turn {
                    id: m.uuid.unwrap_or_else(uuid::Uuid::new_v4),
                    seq: i as u64,
                    role,
                    text: m.content,
                    timestamp: m.created_at.unwrap_or_else(Utc::now),
                    name: m.name.filter(|n| !n.trim().is_empty()),
                }
            })
            .collect())
    }

    /// Rolling summary of a thread. Missing summaries are not an error.
    async fn thread_summary(&self, thread_id: &str) -> Option<String> {
        let resp: Result<ZepThreadContext, MemoryError> = self
            .send_json(self.client.get(self.url(&format!(
                "/threads/{}/context?minRating={}",
                urlencoding::encode(thread_id),
                self.min_relevance
            ))))
            .await;

        match resp {
            Ok(ctx) => ctx.context.filter(|c| !c.trim().is_empty()),
            Err(e) => {
                tracing::debug!("Could not retrieve thread context for {}: {}", thread_id, e);
                None
            }
        }
    }

    /// Messages and summary of the user's latest thread.
    async fn history(&self, user_key: &str) -> Result<(Vec<Turn>, Option<String>), MemoryError> {
        let Some(thread_id) = self.latest_thread(user_key).await? else {
            return Ok((Vec::new(), None));
        };

        let (messages, summary) = tokio::join!(
            self.thread_messages(&thread_id),
            self.thread_summary(&thread_id),
        );
        Ok((messages?, summary))
    }

    fn message_json(&self, turn: &Turn) -> serde_json::Value {
        let name = match (&turn.name, turn.role) {
            (Some(name), _) => name.as_str(),
            (None, Role::User) => "User",
            (None, Role::Agent) => self.kwami_name.as_str(),
        };
        json!({
            "role": turn.role.as_service_role(),
            "content": turn.text,
            "name": name,
            "created_at": turn.timestamp.to_rfc3339(),
        })
    }

    async fn post_messages(&self, session_id: &str, turns: &[Turn]) -> Result<(), MemoryError> {
        let messages: Vec<serde_json::Value> = turns.iter().map(|t| self.message_json(t)).collect();
        let mut body = json!({ "messages": messages });
        // Assistant messages give context but must not create graph entities
        if turns.iter().any(|t| t.role == Role::Agent) {
            body["ignore_roles"] = json!(["assistant"]);
        }

        self.send(
            self.client
                .post(self.url(&format!(
                    "/threads/{}/messages",
                    urlencoding::encode(session_id)
                )))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    // ==================== Graph ====================

    async fn search_edges(
        &self,
        user_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, MemoryError> {
        let body = json!({
            "user_id": user_key,
            "query": query,
            "scope": "edges",
            "reranker": "cross_encoder",
            "limit": limit,
        });

        let resp: GraphSearchResponse = self
            .send_json(self.client.post(self.url("/graph/search")).json(&body))
            .await?;

        Ok(resp
            .edges
            .into_iter()
            .filter(|e| !e.fact.trim().is_empty())
            .map(|e| Fact {
                text: e.fact,
                // Reranked results without a score are treated as fully relevant
                relevance: clamp_relevance(e.score.unwrap_or(1.0)),
                valid_at: e.valid_at,
                invalid_at: e.invalid_at,
                source_turn: e.episodes.into_iter().next(),
            })
            .collect())
    }

    async fn search_nodes(
        &self,
        user_key: &str,
        query: &str,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<Entity>, MemoryError> {
        let mut body = json!({
            "user_id": user_key,
            "query": query,
            "scope": "nodes",
            "reranker": "cross_encoder",
            "limit": limit,
        });
        if !labels.is_empty() {
            body["search_filters"] = json!({ "node_labels": labels });
        }

        let resp: GraphSearchResponse = self
            .send_json(self.client.post(self.url("/graph/search")).json(&body))
            .await?;

        Ok(resp
            .nodes
            .into_iter()
            .filter(|n| !n.name.trim().is_empty())
            .map(|n| Entity {
                kind: n
                    .labels
                    .into_iter()
                    .find(|l| l != "Entity")
                    .unwrap_or_else(|| "entity".to_string()),
                name: n.name,
                summary: n.summary.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl MemoryStore for ZepClient {
    fn name(&self) -> &str {
        "zep"
    }

    async fn verify(&self) -> Result<(), MemoryError> {
        self.send(
            self.client
                .get(self.url("/users-ordered?pageNumber=1&pageSize=1")),
        )
        .await?;
        Ok(())
    }

    async fn ensure_session(&self, kwami_id: &KwamiId, session_id: &str) -> Result<(), MemoryError> {
        let user_key = self.user_key(kwami_id);
        self.ensure_user(kwami_id, &user_key).await?;
        self.ensure_thread(&user_key, session_id).await
    }

    async fn fetch_context(&self, kwami_id: &KwamiId) -> Result<MemoryBundle, MemoryError> {
        let user_key = self.user_key(kwami_id);

        let (facts, entities, history) = tokio::join!(
            self.search_edges(&user_key, FACTS_QUERY, FACTS_LIMIT),
            self.search_nodes(&user_key, FACTS_QUERY, &[], ENTITIES_LIMIT),
            self.history(&user_key),
        );

        // A partial bundle is still useful; only give up when nothing came back
        // or the key was rejected.
        let mut first_err = None;
        let mut take = |part: &str, err: MemoryError| {
            tracing::debug!("Could not retrieve {} for {}: {}", part, user_key, err);
            if first_err.is_none() || matches!(err, MemoryError::Unauthorized(_)) {
                first_err = Some(err);
            }
        };

        let facts = facts.unwrap_or_else(|e| {
            take("facts", e);
            Vec::new()
        });
        let entities = entities.unwrap_or_else(|e| {
            take("entities", e);
            Vec::new()
        });
        let (history, summary) = history.unwrap_or_else(|e| {
            take("history", e);
            (Vec::new(), None)
        });

        match first_err {
            Some(err @ MemoryError::Unauthorized(_)) => return Err(err),
            Some(err)
                if facts.is_empty()
                    && entities.is_empty()
                    && history.is_empty()
                    && summary.is_none() =>
            {
                return Err(err)
            }
            _ => {}
        }

        tracing::debug!(
            "Retrieved context for {}: {} facts, {} entities, {} messages",
            user_key,
            facts.len(),
            entities.len(),
            history.len()
        );

        Ok(MemoryBundle {
            summary,
            facts,
            entities,
            history,
        })
    }

    async fn append_turn(
        &self,
        _kwami_id: &KwamiId,
        session_id: &str,
        turn: &Turn,
    ) -> Result<(), MemoryError> {
        self.post_messages(session_id, std::slice::from_ref(turn))
            .await
    }

    async fn append_exchange(
        &self,
        _kwami_id: &KwamiId,
        session_id: &str,
        turns: &[Turn],
    ) -> Result<(), MemoryError> {
        if turns.is_empty() {
            return Ok(());
        }
        self.post_messages(session_id, turns).await
    }

    async fn store_fact(&self, kwami_id: &KwamiId, fact_text: &str) -> Result<(), MemoryError> {
        let body = json!({
            "user_id": self.user_key(kwami_id),
            "type": "text",
            "data": format!("Important information learned: {}", fact_text),
        });

        self.send(self.client.post(self.url("/graph")).json(&body))
            .await?;
        Ok(())
    }

    async fn search_facts(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Fact>, MemoryError> {
        self.search_edges(&self.user_key(kwami_id), query, limit)
            .await
    }

    async fn search_entities(
        &self,
        kwami_id: &KwamiId,
        query: &str,
        kinds: &[String],
        limit: usize,
    ) -> Result<Vec<Entity>, MemoryError> {
        let query = if query.trim().is_empty() {
            FACTS_QUERY
        } else {
            query
        };
        self.search_nodes(&self.user_key(kwami_id), query, kinds, limit)
            .await
    }
}

fn is_already_exists(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("already exists") || lower.contains("http 409")
}

#[derive(Debug, Deserialize)]
struct ZepThread {
    thread_id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ZepThreadContext {
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZepMessages {
    #[serde(default)]
    messages: Vec<ZepMessage>,
}

#[derive(Debug, Deserialize)]
struct ZepMessage {
    #[serde(default)]
    uuid: Option<uuid::Uuid>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    role_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphSearchResponse {
    #[serde(default)]
    edges: Vec<ZepEdge>,
    #[serde(default)]
    nodes: Vec<ZepNode>,
}

#[derive(Debug, Deserialize)]
struct ZepEdge {
    #[serde(default)]
    fact: String,
    #[serde(default, alias = "relevance")]
    score: Option<f64>,
    #[serde(default)]
    valid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    invalid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    episodes: Vec<uuid::Uuid>,
}

#[derive(Debug, Deserialize)]
struct ZepNode {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ZepClient {
        ZepClient::new(&server.uri(), "test-key", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_context_maps_edges_nodes_and_history() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graph/search"))
            .and(body_partial_json(json!({"scope": "edges", "user_id": "kwami_k1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "edges": [
                    {"fact": "User likes coffee", "score": 0.9},
                    {"fact": "User lived in Lisbon", "score": 0.7,
                     "invalid_at": "2024-01-01T00:00:00Z"},
                    {"fact": "", "score": 0.9}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/graph/search"))
            .and(body_partial_json(json!({"scope": "nodes"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{"name": "Miso", "labels": ["Entity", "Pet"], "summary": "A cat"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/users/kwami_k1/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"thread_id": "old", "created_at": "2024-01-01T00:00:00Z"},
                {"thread_id": "new", "created_at": "2024-06-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/threads/new/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"role": "user", "content": "hi", "created_at": "2024-06-01T00:00:01Z"},
                    {"role_type": "assistant", "content": "hello!", "created_at": "2024-06-01T00:00:02Z"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/threads/new/context"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "context": "Talked about the coffee shop near work."
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let bundle = client.fetch_context(&KwamiId::new("k1")).await.unwrap();

        assert_eq!(
            bundle.summary.as_deref(),
            Some("Talked about the coffee shop near work.")
        );
        assert_eq!(bundle.facts.len(), 2);
        assert_eq!(bundle.facts[0].relevance, 0.9);
        assert!(bundle.facts[1].invalid_at.is_some());
        assert_eq!(bundle.entities.len(), 1);
        assert_eq!(bundle.entities[0].kind, "Pet");
        assert_eq!(bundle.history.len(), 2);
        assert_eq!(bundle.history[1].role, Role::Agent);
    }

    #[tokio::test]
    async fn test_unauthorized_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users-ordered"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.verify().await.unwrap_err();
        assert!(matches!(err, MemoryError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graph"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .store_fact(&KwamiId::new("k1"), "likes tea")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graph/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"edges": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ZepClient::new(&server.uri(), "k", Duration::from_millis(50)).unwrap();
        let err = client
            .search_facts(&KwamiId::new("k1"), "coffee", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_append_turn_ignores_assistant_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/s1/messages"))
            .and(header("Authorization", "Api-Key test-key"))
            .and(body_partial_json(json!({"ignore_roles": ["assistant"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let turn = Turn::new(0, Role::Agent, "Nice to meet you");
        client
            .append_turn(&KwamiId::new("k1"), "s1", &turn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_session_tolerates_existing_thread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/kwami_k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "kwami_k1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/threads"))
            .respond_with(ResponseTemplate::new(400).set_body_string("thread already exists"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .ensure_session(&KwamiId::new("k1"), "s1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_thread_context_leaves_summary_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/kwami_k1/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"thread_id": "t1", "created_at": "2024-06-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"role": "user", "name": "Alex", "content": "hi"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/context"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graph/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let bundle = client.fetch_context(&KwamiId::new("k1")).await.unwrap();

        assert!(bundle.summary.is_none());
        assert_eq!(bundle.history.len(), 1);
        assert_eq!(bundle.history[0].name.as_deref(), Some("Alex"));
    }

    #[tokio::test]
    async fn test_exchange_is_sent_as_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/s1/messages"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "user", "name": "Alex", "content": "I'm training for a marathon"},
                    {"role": "assistant", "name": "Kwami", "content": "That's a big goal!"}
                ],
                "ignore_roles": ["assistant"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let turns = vec![
            Turn::new(0, Role::User, "I'm training for a marathon")
                .with_name(Some("Alex".to_string())),
            Turn::new(1, Role::Agent, "That's a big goal!"),
        ];
        client
            .append_exchange(&KwamiId::new("k1"), "s1", &turns)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unnamed_user_turn_uses_default_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/s1/messages"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "name": "User", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .append_turn(&KwamiId::new("k1"), "s1", &Turn::new(0, Role::User, "hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_entities_filters_by_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graph/search"))
            .and(body_partial_json(json!({
                "scope": "nodes",
                "user_id": "kwami_k1",
                "limit": 20,
                "search_filters": {"node_labels": ["Preference"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [
                    {"name": "Jazz", "labels": ["Entity", "Preference"], "summary": "Favourite music"},
                    {"name": "", "labels": ["Preference"]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let found = client
            .search_entities(&KwamiId::new("k1"), "", &["Preference".to_string()], 20)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Jazz");
        assert_eq!(found[0].kind, "Preference");
    }
}
