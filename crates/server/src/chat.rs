use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::error;

use concierge_agent::{Orchestrator, PipelineError, TurnRequest, TurnResponse};

#[derive(Clone)]
pub struct ChatState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new().route("/v1/chat", post(chat)).with_state(ChatState { orchestrator })
}

pub async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<ErrorBody>)> {
    match state.orchestrator.handle(request).await {
        Ok(response) => Ok(Json(response)),
        Err(PipelineError::UnknownTenant(tenant)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: format!("unknown tenant `{tenant}`") }),
        )),
        Err(error) => {
            // Deployment defects; detail goes to the log, not the wire.
            error!(
                event_name = "chat.pipeline_error",
                error = %error,
                "chat turn failed with a non-recoverable pipeline error"
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: "internal configuration error".to_string() }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;

    use concierge_agent::{TurnRequest, TurnResponse};
    use concierge_core::config::LoadOptions;

    use crate::bootstrap::tests::config_dirs;
    use crate::bootstrap::bootstrap;

    use super::{chat, ChatState};

    async fn state() -> ChatState {
        let (guard, overrides) = config_dirs();
        // Leak the TempDir so registry files outlive the test body.
        std::mem::forget(guard);
        let app = bootstrap(LoadOptions { overrides, ..LoadOptions::default() })
            .await
            .expect("bootstrap");
        ChatState { orchestrator: app.orchestrator }
    }

    fn request(tenant: &str, message: &str) -> TurnRequest {
        TurnRequest {
            tenant_id: tenant.to_string(),
            session_id: Some("sess-http".to_string()),
            message: message.to_string(),
            conversation_history: vec![],
        }
    }

    #[tokio::test]
    async fn chat_turn_round_trips_a_search() {
        let state = state().await;
        let Json(response) = chat(State(state), Json(request("acme", "sneakers under $100")))
            .await
            .expect("chat should succeed");

        match response {
            TurnResponse::ToolResult { action, session_id, .. } => {
                assert_eq!(action, "search");
                assert_eq!(session_id, "sess-http");
            }
            TurnResponse::Message { text, .. } => panic!("expected tool result, got: {text}"),
        }
    }

    #[tokio::test]
    async fn unknown_tenant_maps_to_not_found() {
        let state = state().await;
        let (status, Json(body)) = chat(State(state), Json(request("nobody", "hello")))
            .await
            .expect_err("unknown tenant must fail");

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.error.contains("nobody"));
    }
}
