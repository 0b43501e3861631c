//! REST API server
//!
//! Exposes sessions and turns over HTTP. Every response uses the
//! `{success, data, error, timestamp}` envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::models::TurnOutcome;
use crate::orchestrator::Orchestrator;
use crate::session::SessionStore;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_info: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(e: OrchestrationError) -> ApiResult {
    let status = match &e {
        OrchestrationError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::TurnInProgress(_) => StatusCode::CONFLICT,
        OrchestrationError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

/// Turn outcome without the full transcript
fn turn_view(outcome: &TurnOutcome) -> serde_json::Value {
    serde_json::json!({
        "turn_id": outcome.turn_id,
        "response": outcome.response,
        "state": outcome.state,
        "state_trace": outcome.state_trace,
        "abort_reason": outcome.abort_reason,
        "progress": outcome.agent_contexts.last_output().map(|o| o.progress_description.clone()),
        "plan": outcome.plan,
        "agent_contexts": outcome.agent_contexts,
        "elapsed_ms": outcome.elapsed_ms,
    })
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(
    State(state): State<ApiState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = state.sessions.create(req.user_info).await;

    (
        StatusCode::CREATED,
        Json(ApiResponse::success(serde_json::json!({
            "session_id": session.id(),
            "created_at": session.created_at(),
        }))),
    )
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    let session = match state.sessions.get(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    let user = match session.snapshot() {
        Ok(user) => user,
        Err(e) => return failure(e),
    };

    match state.orchestrator.audit_log().list_for_session(id).await {
        Ok(turns) => ok(serde_json::json!({
            "session_id": session.id(),
            "created_at": session.created_at(),
            "user_contexts": user,
            "turns": turns,
        })),
        Err(e) => failure(e),
    }
}

async fn post_message(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> ApiResult {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty".into())),
        );
    }

    let session = match state.sessions.get(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    info!(session_id = %id, "Received message");

    // The turn outlives this handler: a client that hangs up cancels it,
    // but its context and audit record are still written.
    let running = match session.start_turn(state.orchestrator.clone(), req.message) {
        Ok(running) => running,
        Err(e) => return failure(e),
    };

    match running.outcome().await {
        Ok(outcome) => ok(turn_view(&outcome)),
        Err(e) => failure(e),
    }
}

async fn cancel_turn(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    match state.sessions.get(id).await {
        Ok(session) => ok(serde_json::json!({ "cancelled": session.cancel() })),
        Err(e) => failure(e),
    }
}

async fn reset_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    let session = match state.sessions.get(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    match session.reset() {
        Ok(()) => ok(serde_json::json!({ "session_id": id, "reset": true })),
        Err(e) => failure(e),
    }
}

/// =============================
/// Audit Endpoint
/// =============================

async fn get_turn(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    let audit_log = state.orchestrator.audit_log();

    match audit_log.get(id).await {
        Ok(Some(record)) => {
            let verified = audit_log.verify_integrity(id).await.unwrap_or(false);
            ok(serde_json::json!({ "record": record, "verified": verified }))
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Turn not found: {}", id))),
        ),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, sessions: Arc<SessionStore>) -> Router {
    let state = ApiState {
        orchestrator,
        sessions,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/cancel", post(cancel_turn))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/turns/:id", get(get_turn))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, Arc::new(SessionStore::new()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::models::AgentId;
    use crate::planner::StaticPlanner;
    use crate::runtime::AgentRuntime;
    use crate::orchestrator::FALLBACK_RESPONSE;
    use crate::test_support::{prompt_library, test_config, text, ScriptStep, ScriptedLlm};
    use crate::tools::ToolRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router() -> Router {
        router_with(ScriptedLlm::new(vec![]).repeating(text("분산 투자를 권합니다.")))
    }

    fn router_with(llm: ScriptedLlm) -> Router {
        let runtime = AgentRuntime::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new()),
            Arc::new(prompt_library()),
            Arc::new(test_config()),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Box::new(StaticPlanner::single(AgentId::FundManager, "조언")),
            runtime,
            Arc::new(AuditLog::new()),
        ));
        create_router(orchestrator, Arc::new(SessionStore::new()))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, ApiResponse) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_session_turn_flow() {
        let router = router();

        let (status, created) = call(
            &router,
            "POST",
            "/api/sessions",
            Some(serde_json::json!({"user_info": {"name": "김투자"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let session_id = created.data.unwrap()["session_id"].as_str().unwrap().to_string();

        let (status, turn) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/messages", session_id),
            Some(serde_json::json!({"message": "포트폴리오 조언해줘"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let turn = turn.data.unwrap();
        assert_eq!(turn["response"], "분산 투자를 권합니다.");
        assert_eq!(turn["state"]["state"], "done");

        let turn_id = turn["turn_id"].as_str().unwrap().to_string();
        let (status, audit) = call(&router, "GET", &format!("/api/turns/{}", turn_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit.data.unwrap()["verified"], true);

        let (_, session) = call(&router, "GET", &format!("/api/sessions/{}", session_id), None).await;
        let session = session.data.unwrap();
        assert_eq!(session["user_contexts"]["chat_history"].as_array().unwrap().len(), 2);
        assert_eq!(session["turns"][0], turn_id.as_str());

        let (status, _) = call(&router, "POST", &format!("/api/sessions/{}/reset", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_session_and_empty_message() {
        let router = router();

        let (status, response) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/messages", Uuid::new_v4()),
            Some(serde_json::json!({"message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!response.success);

        let (_, created) = call(&router, "POST", "/api/sessions", None).await;
        let session_id = created.data.unwrap()["session_id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/messages", session_id),
            Some(serde_json::json!({"message": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, cancelled) = call(&router, "POST", &format!("/api/sessions/{}/cancel", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled.data.unwrap()["cancelled"], false);
    }

    #[tokio::test]
    async fn test_client_disconnect_keeps_the_turn() {
        let router = router_with(ScriptedLlm::from_steps(vec![ScriptStep::Delayed(
            Duration::from_millis(200),
            text("늦은 답변"),
        )]));

        let (_, created) = call(&router, "POST", "/api/sessions", None).await;
        let session_id = created.data.unwrap()["session_id"].as_str().unwrap().to_string();

        let hung_up = tokio::time::timeout(
            Duration::from_millis(50),
            call(
                &router,
                "POST",
                &format!("/api/sessions/{}/messages", session_id),
                Some(serde_json::json!({"message": "천천히 답해줘"})),
            ),
        )
        .await;
        assert!(hung_up.is_err());

        let session = loop {
            let (status, response) = call(&router, "GET", &format!("/api/sessions/{}", session_id), None).await;
            if status == StatusCode::OK {
                break response.data.unwrap();
            }
            assert_eq!(status, StatusCode::CONFLICT);
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let history = session["user_contexts"]["chat_history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["content"], FALLBACK_RESPONSE);
        assert_eq!(session["turns"].as_array().unwrap().len(), 1);

        let (_, cancelled) = call(&router, "POST", &format!("/api/sessions/{}/cancel", session_id), None).await;
        assert_eq!(cancelled.data.unwrap()["cancelled"], false);
    }
}
