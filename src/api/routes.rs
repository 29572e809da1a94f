//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use super::types::*;
use crate::config::Config;
use crate::memory::{
    assemble, filter_facts, KwamiId, MemoryError, SharedStore, MAX_FACTS,
};
use crate::session::{MemoryService, PREFERENCES_LIMIT, RECALL_LIMIT};

/// Shared application state.
pub struct AppState {
    pub memory: MemoryService,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/memory/:kwami_id/facts", get(get_facts))
        .route("/api/memory/:kwami_id/context", get(get_context))
        .route("/api/memory/:kwami_id/entities", get(get_entities))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config, store: Option<SharedStore>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        memory: MemoryService::new(config.memory, store),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn memory_store(state: &AppState) -> Result<&SharedStore, (StatusCode, String)> {
    state.memory.store().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Memory is not configured".to_string(),
        )
    })
}

fn upstream_error(err: MemoryError) -> (StatusCode, String) {
    tracing::warn!("Memory request failed: {}", err);
    let status = match err {
        MemoryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        MemoryError::Unavailable(_) | MemoryError::Unauthorized(_) => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.memory.store();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        memory_enabled: store.is_some(),
        memory_backend: store.map(|s| s.name().to_string()),
    })
}

/// Facts for an identity, optionally narrowed to a topic.
async fn get_facts(
    State(state): State<Arc<AppState>>,
    Path(kwami_id): Path<String>,
    Query(params): Query<FactsQuery>,
) -> Result<Json<FactsResponse>, (StatusCode, String)> {
    let store = memory_store(&state)?;
    let config = state.memory.config();
    let kwami_id = KwamiId::new(kwami_id);
    let query = params
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());

    let (raw, default_limit) = match &query {
        Some(q) => {
            let limit = params.limit.unwrap_or(RECALL_LIMIT).clamp(1, MAX_FACTS);
            let hits = store
                .search_facts(&kwami_id, q, limit * 2)
                .await
                .map_err(upstream_error)?;
            (hits, limit)
        }
        None => {
            let bundle = store
                .fetch_context(&kwami_id)
                .await
                .map_err(upstream_error)?;
            (bundle.facts, params.limit.unwrap_or(MAX_FACTS).clamp(1, MAX_FACTS))
        }
    };

    let mut facts = filter_facts(&raw, config.min_fact_relevance, &config.kwami_name);
    facts.truncate(default_limit);

    Ok(Json(FactsResponse {
        kwami_id,
        query,
        facts,
    }))
}

/// The assembled context a new session would receive.
async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(kwami_id): Path<String>,
) -> Result<Json<ContextResponse>, (StatusCode, String)> {
    let store = memory_store(&state)?;
    let kwami_id = KwamiId::new(kwami_id);

    let bundle = store
        .fetch_context(&kwami_id)
        .await
        .map_err(upstream_error)?;
    let context = assemble(&bundle, state.memory.config());
    let prompt_block = context.to_prompt_block();

    Ok(Json(ContextResponse {
        kwami_id,
        context,
        prompt_block,
    }))
}

/// Entities for an identity, optionally of one type.
async fn get_entities(
    State(state): State<Arc<AppState>>,
    Path(kwami_id): Path<String>,
    Query(params): Query<EntitiesQuery>,
) -> Result<Json<EntitiesResponse>, (StatusCode, String)> {
    let store = memory_store(&state)?;
    let kwami_id = KwamiId::new(kwami_id);
    let kind = params
        .kind
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    let kinds: Vec<String> = kind.iter().cloned().collect();
    let limit = params
        .limit
        .unwrap_or(PREFERENCES_LIMIT)
        .clamp(1, PREFERENCES_LIMIT);

    let entities = store
        .search_entities(
            &kwami_id,
            params.query.as_deref().unwrap_or("").trim(),
            &kinds,
            limit,
        )
        .await
        .map_err(upstream_error)?;

    Ok(Json(EntitiesResponse {
        kwami_id,
        kind,
        entities,
    }))
}
