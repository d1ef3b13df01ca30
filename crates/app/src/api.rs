use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use book_ingest_core::{FileType, IngestError, IngestJob, StoreAuth, SummaryOutcome};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Seam between the HTTP surface and the job machinery, so the router can
/// be exercised with a stub.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn submit(&self, job: IngestJob) -> Result<(), IngestError>;

    async fn generate_summaries(
        &self,
        book_id: &str,
        auth: StoreAuth,
    ) -> Result<SummaryOutcome, IngestError>;
}

pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ServiceApi + 'static,
{
    Router::new()
        .route("/parse-ebook", post(parse_ebook::<S>))
        .route(
            "/generate-section-summary",
            post(generate_section_summary::<S>),
        )
        .with_state(service)
}

#[derive(Deserialize)]
struct ParseEbookRequest {
    book_id: Option<String>,
    #[serde(default)]
    ebook_url: Option<String>,
    #[serde(default = "default_page_count")]
    page_count: usize,
    #[serde(default)]
    file_type: FileType,
    #[serde(default)]
    use_vision_model: bool,
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(default)]
    is_administrator: bool,
}

fn default_page_count() -> usize {
    1
}

/// Accepts an ingestion request, queues it, and acknowledges immediately.
/// The real result arrives later through the callback, if one was given.
async fn parse_ebook<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<ParseEbookRequest>,
) -> Response
where
    S: ServiceApi,
{
    let auth = match resolve_auth(&headers, request.is_administrator) {
        Ok(auth) => auth,
        Err(rejection) => return rejection,
    };

    let Some(book_id) = request.book_id.filter(|id| !id.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing required book_id parameter" })),
        )
            .into_response();
    };

    let job = IngestJob {
        id: Uuid::new_v4(),
        book_id: book_id.clone(),
        source_url: request.ebook_url,
        page_count: request.page_count,
        file_type: request.file_type,
        use_vision_model: request.use_vision_model,
        callback_url: request.callback_url,
        auth,
        submitted_at: Utc::now(),
    };

    tracing::info!(
        book_id = %job.book_id,
        file_type = %job.file_type,
        page_count = job.page_count,
        callback_url = ?job.callback_url,
        "accepted ingestion request"
    );

    match service.submit(job).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Processing started in background",
                "book_id": book_id,
            })),
        )
            .into_response(),
        Err(failure) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": failure.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct SummaryRequest {
    book_id: Option<String>,
    #[serde(default)]
    is_administrator: bool,
}

/// Runs section-summary generation synchronously and returns the outcome
/// inline, unlike the ingestion trigger.
async fn generate_section_summary<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<SummaryRequest>,
) -> Response
where
    S: ServiceApi,
{
    let auth = match resolve_auth(&headers, request.is_administrator) {
        Ok(auth) => auth,
        Err(rejection) => return rejection,
    };

    let Some(book_id) = request.book_id.filter(|id| !id.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing required parameters" })),
        )
            .into_response();
    };

    match service.generate_summaries(&book_id, auth).await {
        Ok(outcome) if !outcome.book_found => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Book not found" })),
        )
            .into_response(),
        Ok(outcome) => Json(outcome).into_response(),
        Err(failure) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Error generating section summaries: {failure}")
            })),
        )
            .into_response(),
    }
}

/// Administrator requests get the service-role connection; everyone else
/// must present a bearer token that scopes the store to their identity.
/// Rejection happens here, before any job exists.
fn resolve_auth(headers: &HeaderMap, is_administrator: bool) -> Result<StoreAuth, Response> {
    if is_administrator {
        return Ok(StoreAuth::ServiceRole);
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    match token {
        Some(token) => Ok(StoreAuth::Bearer(token.to_string())),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        )
            .into_response()),
    }
}
