use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use planwright_core::checkpoint::SessionSummary;
use planwright_core::knowledge::KnowledgeLedger;
use planwright_core::model::{BusinessContext, Program, UpstreamInsights};
use planwright_core::rounds::{TOTAL_ROUNDS, percent_complete};
use planwright_core::{GenerateRequest, GenerationError, Orchestrator};
use planwright_db::models::SessionStatus;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let status = match &err {
            GenerationError::InvalidContext(_) => StatusCode::BAD_REQUEST,
            GenerationError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            GenerationError::SessionNotResumable { .. }
            | GenerationError::SessionBusy(_)
            | GenerationError::Cancelled(_) => StatusCode::CONFLICT,
            GenerationError::InvalidCheckpoint { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GenerationError::SessionFailed { .. } | GenerationError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub user_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub context: BusinessContext,
    #[serde(default)]
    pub insights: UpstreamInsights,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    #[serde(flatten)]
    pub session: SessionSummary,
    /// Whether the session is executing in this server right now.
    pub running: bool,
    pub total_rounds: u32,
    pub percent_complete: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultResponse {
    pub session_id: Uuid,
    pub program: Program,
    pub knowledge: KnowledgeLedger,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(start_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/result", get(get_job_result))
        .route("/api/jobs/{id}/resume", post(resume_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(orchestrator: Arc<Orchestrator>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(orchestrator);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("planwright serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("planwright serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C, shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn job_response(orchestrator: &Orchestrator, session: SessionSummary) -> JobResponse {
    JobResponse {
        running: orchestrator.is_running(session.session_id),
        total_rounds: TOTAL_ROUNDS,
        percent_complete: percent_complete(session.round_index),
        session,
    }
}

/// Run the session in the background. Errors are logged; callers observe
/// them through the job status.
fn spawn_session(orchestrator: Arc<Orchestrator>, session_id: Uuid) {
    tokio::spawn(async move {
        match orchestrator.resume_session(session_id, None).await {
            Ok(outcome) => tracing::info!(
                session_id = %session_id,
                workstreams = outcome.program.workstreams.len(),
                "background job completed"
            ),
            Err(err) => tracing::warn!(session_id = %session_id, error = %err, "background job stopped"),
        }
    });
}

/// Start a job. A correlation id that matches an unfinished session
/// returns that session instead of starting a second one.
async fn start_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<StartJobRequest>,
) -> Result<Response, AppError> {
    if let Some(correlation_id) = body.correlation_id.as_deref() {
        if let Some(existing) = orchestrator.find_active_session(correlation_id).await? {
            if !orchestrator.is_running(existing.session_id) {
                spawn_session(Arc::clone(&orchestrator), existing.session_id);
            }
            let response = job_response(&orchestrator, existing);
            return Ok((StatusCode::OK, Json(response)).into_response());
        }
    }

    let mut request =
        GenerateRequest::new(body.user_id, body.context).with_insights(body.insights);
    if let Some(correlation_id) = body.correlation_id {
        request = request.with_correlation_id(correlation_id);
    }
    let session_id = orchestrator.create_session(&request).await?;
    let session = orchestrator.session_status(session_id).await?;
    spawn_session(Arc::clone(&orchestrator), session_id);

    let response = job_response(&orchestrator, session);
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn get_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = orchestrator.session_status(id).await?;
    Ok(Json(job_response(&orchestrator, session)).into_response())
}

/// 200 with the program once completed, 202 while it is still being
/// generated, 500 when the session failed.
async fn get_job_result(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = orchestrator.session_status(id).await?;
    match session.status {
        SessionStatus::Completed => {
            // Completed sessions return their stored program without running.
            let outcome = orchestrator.resume_session(id, None).await?;
            Ok(Json(JobResultResponse {
                session_id: outcome.session_id,
                program: outcome.program,
                knowledge: outcome.knowledge,
            })
            .into_response())
        }
        SessionStatus::Failed => Err(AppError::internal(format!(
            "session {id} failed: {}",
            session.failure_reason.as_deref().unwrap_or("unknown reason")
        ))),
        _ => Ok((StatusCode::ACCEPTED, Json(job_response(&orchestrator, session))).into_response()),
    }
}

async fn resume_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = orchestrator.session_status(id).await?;
    if session.status.is_terminal() {
        if session.status == SessionStatus::Completed {
            return Ok(Json(job_response(&orchestrator, session)).into_response());
        }
        return Err(GenerationError::SessionNotResumable {
            session_id: id,
            status: session.status,
        }
        .into());
    }
    if orchestrator.is_running(id) {
        return Err(GenerationError::SessionBusy(id).into());
    }

    spawn_session(Arc::clone(&orchestrator), id);
    Ok((StatusCode::ACCEPTED, Json(job_response(&orchestrator, session))).into_response())
}

async fn cancel_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = orchestrator.session_status(id).await?;
    let cancelled = orchestrator.cancel(id);
    let status = if cancelled {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    let body = serde_json::json!({
        "sessionId": session.session_id,
        "cancelled": cancelled,
        "status": session.status,
    });
    Ok((status, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use planwright_core::agent::AgentPool;
    use planwright_core::checkpoint::{CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore};
    use planwright_core::model::{BusinessContext, Constraints, Scale, TimelineRange};
    use planwright_core::{GenerateRequest, Orchestrator, OrchestratorConfig};
    use planwright_test_utils::{create_test_db, drop_test_db};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn orchestrator(store: Arc<dyn CheckpointStore>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            store,
            AgentPool::standard(),
            OrchestratorConfig::default(),
        ))
    }

    fn in_memory() -> Arc<Orchestrator> {
        orchestrator(Arc::new(InMemoryCheckpointStore::new()))
    }

    fn context() -> BusinessContext {
        BusinessContext {
            name: "Contoso".into(),
            business_type: "retail".into(),
            scale: Scale::MidMarket,
            description: "Unify store and online inventory".into(),
            industry: Some("retail".into()),
            keywords: vec!["inventory".into()],
            constraints: Some(Constraints {
                timeline_range: Some(TimelineRange { min: 12, max: 24 }),
                ..Default::default()
            }),
        }
    }

    async fn send(
        orch: Arc<Orchestrator>,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        let app = super::build_router(orch);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(json) => Body::from(serde_json::to_vec(&json).unwrap()),
            None => Body::empty(),
        };
        app.oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 16 * 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn start_body(correlation_id: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "userId": "user-1",
            "correlationId": correlation_id,
            "context": context(),
        })
    }

    async fn wait_for_result(orch: &Arc<Orchestrator>, id: &str) -> axum::response::Response {
        for _ in 0..200 {
            let resp = send(orch.clone(), "GET", &format!("/api/jobs/{id}/result"), None).await;
            if resp.status() != StatusCode::ACCEPTED {
                return resp;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} did not finish");
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health() {
        let resp = send(in_memory(), "GET", "/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let id = uuid::Uuid::new_v4();
        let resp = send(in_memory(), "GET", &format!("/api/jobs/{id}"), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(in_memory(), "GET", &format!("/api/jobs/{id}/result"), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_context_is_bad_request() {
        let mut body = start_body(None);
        body["context"]["description"] = serde_json::json!("  ");
        let resp = send(in_memory(), "POST", "/api/jobs", Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("description"));
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let orch = in_memory();

        let resp = send(orch.clone(), "POST", "/api/jobs", Some(start_body(None))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let job = body_json(resp).await;
        let id = job["sessionId"].as_str().unwrap().to_string();
        assert_eq!(job["totalRounds"], 7);

        let resp = wait_for_result(&orch, &id).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let result = body_json(resp).await;
        assert_eq!(result["sessionId"], id.as_str());
        assert_eq!(result["program"]["workstreams"].as_array().unwrap().len(), 5);
        assert_eq!(result["program"]["timeline"]["totalMonths"], 24);
        assert!(result["knowledge"]["stats"].is_object());

        let resp = send(orch.clone(), "GET", &format!("/api/jobs/{id}"), None).await;
        let status = body_json(resp).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["percentComplete"], 100);

        // Resuming a finished job is a no-op.
        let resp = send(orch.clone(), "POST", &format!("/api/jobs/{id}/resume"), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_correlation_id_returns_unfinished_session() {
        let orch = in_memory();
        let existing = orch
            .create_session(&GenerateRequest::new("user-1", context()).with_correlation_id("job-42"))
            .await
            .unwrap();

        let resp = send(orch.clone(), "POST", "/api/jobs", Some(start_body(Some("job-42")))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let job = body_json(resp).await;
        assert_eq!(job["sessionId"], existing.to_string());
        assert_eq!(orch.list_sessions(None).await.unwrap().len(), 1);

        // The existing session was picked up and finishes.
        let resp = wait_for_result(&orch, &existing.to_string()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pending_job_can_be_resumed() {
        let orch = in_memory();
        let id = orch
            .create_session(&GenerateRequest::new("user-1", context()))
            .await
            .unwrap();

        let resp = send(orch.clone(), "GET", &format!("/api/jobs/{id}/result"), None).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = send(orch.clone(), "POST", &format!("/api/jobs/{id}/resume"), None).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = wait_for_result(&orch, &id.to_string()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_idle_job_conflicts() {
        let orch = in_memory();
        let id = orch
            .create_session(&GenerateRequest::new("user-1", context()))
            .await
            .unwrap();
        let resp = send(orch, "POST", &format!("/api/jobs/{id}/cancel"), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["cancelled"], false);
    }

    #[tokio::test]
    async fn test_job_persists_to_postgres() {
        let (pool, db_name) = create_test_db().await;
        let orch = orchestrator(Arc::new(PgCheckpointStore::new(pool.clone())));

        let resp = send(orch.clone(), "POST", "/api/jobs", Some(start_body(Some("pg-job")))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let id = body_json(resp).await["sessionId"].as_str().unwrap().to_string();

        let resp = wait_for_result(&orch, &id).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let row = planwright_db::queries::sessions::get_session(&pool, id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.correlation_id.as_deref(), Some("pg-job"));
        assert!(row.completed_at.is_some());

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
