//! WebSocket and REST transport for datascope.
//!
//! Exposes the conversation lifecycle over HTTP and the live envelope
//! stream over WebSocket:
//!
//! - `GET  /health`                           — liveness
//! - `POST /api/conversations`                — create a conversation
//! - `GET  /api/conversations`                — list summaries
//! - `GET  /api/conversations/{id}/history`   — transcript + memory trail
//! - `GET  /ws/{conversation_id}`             — analyze stream
//!
//! Built on axum. Conversation state lives in the engine crate's
//! [`ConversationRegistry`]; this crate is thin transport plumbing.

mod ws;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use datascope_engine::ConversationRegistry;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for all gateway routes.
pub struct GatewayState {
    pub registry: Arc<ConversationRegistry>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/conversations", post(create_conversation_handler))
        .route("/api/conversations", get(list_conversations_handler))
        .route(
            "/api/conversations/{id}/history",
            get(conversation_history_handler),
        )
        .route("/ws/{conversation_id}", get(ws_handler))
        // The analysis frontend is a separate origin; the API carries no
        // credentials, so a permissive policy is acceptable here.
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct NewConversationResponse {
    success: bool,
    conversation_id: String,
}

async fn create_conversation_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let handle = state.registry.create().await;
    info!(conversation_id = %handle.id, "Conversation created via REST");
    (
        StatusCode::CREATED,
        Json(NewConversationResponse {
            success: true,
            conversation_id: handle.id.clone(),
        }),
    )
}

async fn list_conversations_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let conversations = state.registry.summaries().await;
    Json(serde_json::json!({
        "success": true,
        "count": conversations.len(),
        "conversations": conversations,
    }))
}

async fn conversation_history_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(transcript) = state.registry.transcript(&id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "error": "Conversation not found",
            })),
        );
    };
    let results = state.registry.memory_trail(&id).await.unwrap_or_default();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "transcript": transcript,
            "results": results,
            "count": transcript.len() + results.len(),
        })),
    )
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, conversation_id, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use datascope_core::error::InferenceError;
    use datascope_core::inference::{InferenceBackend, StructuredRequest};
    use datascope_engine::Orchestrator;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    struct DeadBackend;

    #[async_trait::async_trait]
    impl InferenceBackend for DeadBackend {
        fn name(&self) -> &str {
            "dead"
        }
        async fn structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<serde_json::Value, InferenceError> {
            Err(InferenceError::NotConfigured("test backend".into()))
        }
    }

    fn test_router() -> Router {
        let registry = Arc::new(ConversationRegistry::new(Arc::new(|id: &str| {
            Orchestrator::new(id, "{}", Arc::new(DeadBackend))
        })));
        build_router(Arc::new(GatewayState { registry }))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_then_list_conversations() {
        let router = test_router();

        let created = router
            .clone()
            .oneshot(
                Request::post("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = body_json(created).await;
        let id = created["conversation_id"].as_str().unwrap().to_string();

        let listed = router
            .oneshot(Request::get("/api/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(listed).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["conversations"][0]["id"], id.as_str());
    }

    #[tokio::test]
    async fn history_of_unknown_conversation_is_404() {
        let response = test_router()
            .oneshot(
                Request::get("/api/conversations/nope/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn history_of_fresh_conversation_is_empty() {
        let router = test_router();
        let created = router
            .clone()
            .oneshot(
                Request::post("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(created).await["conversation_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router
            .oneshot(
                Request::get(format!("/api/conversations/{id}/history"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 0);
        assert!(body["results"].as_array().unwrap().is_empty());
    }
}
