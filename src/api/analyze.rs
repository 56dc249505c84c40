//! Analysis endpoints
//!
//! Both endpoints validate synchronously and answer problems as plain JSON
//! errors. Once a session is locked the response switches to an event
//! stream fed by a spawned run; the session id travels in `X-File-Id`.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{HttpResponse, post, web};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use utoipa::ToSchema;

use super::error::ApiError;
use crate::app::AppState;
use crate::model::{ProviderConfig, ProviderKind, ProviderOverrides, StreamEvent};
use crate::service::session_store::SessionGuard;
use crate::service::{AnalysisPipeline, PipelineError, StreamEmitter, decode_document};

pub const FILE_ID_HEADER: &str = "X-File-Id";

/// Start a new analysis
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// `openai`, `deepseek` or `custom`
    pub provider: Option<String>,
    pub api_key: Option<String>,
    /// Required for the `custom` provider
    pub custom_api_url: Option<String>,
    pub custom_model: Option<String>,
    /// Base64 encoded PDF or UTF-8 text
    pub file_content: Option<String>,
    pub file_name: Option<String>,
}

/// Resume an interrupted analysis
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequest {
    pub file_id: Option<String>,
    /// Overrides replace the values stored with the session
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub custom_api_url: Option<String>,
    pub custom_model: Option<String>,
}

/// Blank strings count as absent
fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_provider(value: &str) -> Result<ProviderKind, ApiError> {
    value.parse().map_err(ApiError::BadRequest)
}

/// Start a fresh analysis and stream its progress
#[utoipa::path(
    post,
    path = "/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Event stream of analysis progress", content_type = "text/event-stream", body = String),
        (status = 400, description = "Missing fields, unknown provider or unreadable document", body = super::error::ErrorResponse)
    ),
    tag = "analysis"
)]
#[post("/analyze")]
pub async fn analyze(
    state: web::Data<AppState>,
    body: web::Json<AnalyzeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let (Some(provider), Some(api_key), Some(file_content)) = (
        present(body.provider),
        present(body.api_key),
        present(body.file_content),
    ) else {
        return Err(ApiError::BadRequest(
            "provider, apiKey and fileContent are required".to_string(),
        ));
    };

    let provider_config = ProviderConfig {
        kind: parse_provider(&provider)?,
        api_key,
        endpoint_override: present(body.custom_api_url),
        model_override: present(body.custom_model),
    };

    let document_text = web::block(move || decode_document(&file_content))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let session = state
        .pipeline
        .start(document_text, present(body.file_name), provider_config)
        .await?;

    Ok(stream_run(state.pipeline.clone(), session))
}

/// Resume an interrupted analysis, running only the unfinished stages
#[utoipa::path(
    post,
    path = "/analyze/continue",
    request_body = ContinueRequest,
    responses(
        (status = 200, description = "Event stream of analysis progress", content_type = "text/event-stream", body = String),
        (status = 400, description = "Missing fileId or invalid provider override", body = super::error::ErrorResponse),
        (status = 404, description = "Session not found", body = super::error::ErrorResponse),
        (status = 409, description = "Session is already being analyzed", body = super::error::ErrorResponse)
    ),
    tag = "analysis"
)]
#[post("/analyze/continue")]
pub async fn continue_analysis(
    state: web::Data<AppState>,
    body: web::Json<ContinueRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let file_id =
        present(body.file_id).ok_or_else(|| ApiError::BadRequest("fileId is required".to_string()))?;

    let overrides = ProviderOverrides {
        kind: present(body.provider)
            .map(|p| parse_provider(&p))
            .transpose()?,
        api_key: present(body.api_key),
        endpoint_override: present(body.custom_api_url),
        model_override: present(body.custom_model),
    };

    let session = state.pipeline.resume(&file_id, overrides).await?;
    Ok(stream_run(state.pipeline.clone(), session))
}

/// Spawn the run and hand back the streaming response
fn stream_run(pipeline: Arc<AnalysisPipeline>, session: SessionGuard) -> HttpResponse {
    let file_id = session.id.clone();
    let (emitter, rx) = StreamEmitter::channel();

    tokio::spawn(drive(pipeline, session, emitter));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((FILE_ID_HEADER, file_id))
        .streaming(UnboundedReceiverStream::new(rx).map(Ok::<_, actix_web::Error>))
}

/// Run the pipeline until it finishes or the caller goes away. Dropping the
/// run future cancels the in-flight provider call and releases the session.
async fn drive(pipeline: Arc<AnalysisPipeline>, session: SessionGuard, emitter: StreamEmitter) {
    let file_id = session.id.clone();

    let outcome = tokio::select! {
        result = pipeline.run(session, &emitter) => Some(result),
        _ = emitter.closed() => None,
    };

    match outcome {
        Some(Ok(_)) => {}
        None | Some(Err(PipelineError::Disconnected)) => {
            tracing::info!(session_id = %file_id, "Client disconnected, analysis cancelled");
        }
        Some(Err(e)) => {
            tracing::error!(session_id = %file_id, error = %e, "Analysis failed");
            let event = StreamEvent::error("Analysis failed", e.to_string(), Some(file_id.clone()));
            if let Err(e) = emitter.emit(&event) {
                tracing::debug!(session_id = %file_id, error = %e, "Could not deliver error event");
            }
        }
    }
}

/// Configure analysis routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(analyze).service(continue_analysis);
}
