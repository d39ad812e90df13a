//! HTTP control plane: an axum `Router` wired to shared `AppState`, with
//! per-route JSON request/response bodies.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use scope_core::error::ScopeError;
use scope_core::pipeline_manager::{PipelineManager, PipelineStatus};
use scope_core::session_manager::{OfferRequest as CoreOfferRequest, SessionManager};
use scope_core::types::{InitialParameters, ParameterBag};

/// Shared server state handed to every axum handler.
pub struct AppState {
    pub pipeline_manager: Arc<PipelineManager>,
    pub session_manager: Arc<SessionManager>,
}

/// Maps [`ScopeError`] onto the HTTP status codes spec.md §7 assigns:
/// `InvalidState` -> 400, everything else uncaught -> 500.
impl IntoResponse for ScopeError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ScopeError::InvalidState(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/pipeline/load", post(load_pipeline))
        .route("/api/v1/pipeline/status", get(pipeline_status))
        .route("/api/v1/webrtc/offer", post(webrtc_offer))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: u64,
}

/// `GET /health` — always 200.
async fn health() -> Json<HealthResponse> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Json(HealthResponse { status: "ok", timestamp })
}

#[derive(Deserialize)]
struct LoadPipelineRequest {
    pipeline_id: String,
    #[serde(default)]
    load_params: ParameterBag,
}

#[derive(Serialize)]
struct LoadPipelineResponse {
    status: &'static str,
}

/// `POST /api/v1/pipeline/load` — serialized via the manager; 500 with an error
/// body on load failure. The load itself (tens of seconds) runs on a blocking
/// thread pool task so it never stalls the axum worker thread (spec.md §4.2:
/// "must run off the request-handling thread").
async fn load_pipeline(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadPipelineRequest>,
) -> axum::response::Response {
    let manager = Arc::clone(&state.pipeline_manager);
    let pipeline_id = body.pipeline_id.clone();
    let result = tokio::task::spawn_blocking(move || manager.load(&pipeline_id, body.load_params)).await;

    match result {
        Ok(Ok(_)) => (StatusCode::OK, Json(LoadPipelineResponse { status: "ok" })).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, pipeline_id = %body.pipeline_id, "pipeline load failed");
            e.into_response()
        }
        Err(join_err) => {
            error!(error = %join_err, pipeline_id = %body.pipeline_id, "pipeline load task panicked");
            ScopeError::LoadFailure {
                pipeline_id: body.pipeline_id,
                message: format!("load task panicked: {join_err}"),
            }
            .into_response()
        }
    }
}

#[derive(Serialize)]
struct PipelineStatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    load_params: Option<ParameterBag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /api/v1/pipeline/status`.
async fn pipeline_status(State(state): State<Arc<AppState>>) -> Json<PipelineStatusResponse> {
    let response = match state.pipeline_manager.status() {
        PipelineStatus::NotLoaded => PipelineStatusResponse {
            status: "not_loaded",
            pipeline_id: None,
            load_params: None,
            error: None,
        },
        PipelineStatus::Loading => PipelineStatusResponse {
            status: "loading",
            pipeline_id: None,
            load_params: None,
            error: None,
        },
        PipelineStatus::Loaded { id, load_params } => PipelineStatusResponse {
            status: "loaded",
            pipeline_id: Some(id),
            load_params: Some(load_params),
            error: None,
        },
        PipelineStatus::Error { message } => PipelineStatusResponse {
            status: "error",
            pipeline_id: None,
            load_params: None,
            error: Some(message),
        },
    };
    Json(response)
}

#[derive(Deserialize)]
struct OfferRequestBody {
    sdp: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    sdp_type: String,
    #[serde(default)]
    #[serde(rename = "initialParameters")]
    initial_parameters: Option<InitialParameters>,
}

#[derive(Serialize)]
struct AnswerResponseBody {
    sdp: String,
    #[serde(rename = "type")]
    sdp_type: &'static str,
}

/// `POST /api/v1/webrtc/offer` — 400 if the pipeline is not loaded.
async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OfferRequestBody>,
) -> axum::response::Response {
    let initial_parameters = body
        .initial_parameters
        .map(InitialParameters::into_bag)
        .unwrap_or_default();

    match state
        .session_manager
        .handle_offer(CoreOfferRequest {
            sdp: body.sdp,
            initial_parameters,
        })
        .await
    {
        Ok(answer) => {
            info!("webrtc offer handled, answer produced");
            (
                StatusCode::OK,
                Json(AnswerResponseBody { sdp: answer.sdp, sdp_type: "answer" }),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
