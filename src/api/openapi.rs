//! OpenAPI specification endpoints

use actix_web::{HttpResponse, Responder, get};
use utoipa::OpenApi;

use super::error::ApiError;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Document Review Agent",
        description = "Staged AI review of product documents with resumable streaming sessions"
    ),
    paths(
        super::analyze::analyze,
        super::analyze::continue_analysis,
        super::health::health,
    ),
    components(schemas(
        super::analyze::AnalyzeRequest,
        super::analyze::ContinueRequest,
        super::health::HealthResponse,
        super::error::ErrorResponse,
        crate::model::TokenUsage,
        crate::model::ProviderKind,
    )),
    tags(
        (name = "analysis", description = "Document analysis runs"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Serve OpenAPI YAML specification
#[get("/openapi.yaml")]
pub async fn openapi_yaml() -> Result<HttpResponse, ApiError> {
    let yaml = ApiDoc::openapi()
        .to_yaml()
        .map_err(|e| ApiError::Internal(format!("Failed to render OpenAPI YAML: {}", e)))?;

    Ok(HttpResponse::Ok().content_type("text/yaml").body(yaml))
}

/// Configure OpenAPI routes
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(openapi_json).service(openapi_yaml);
}
