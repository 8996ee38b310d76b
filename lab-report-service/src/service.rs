use axum::{
    Router,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    dashboard::DashboardSummary,
    error::ExtractError,
    extract::{self, LlmClient},
    known_signals,
    store::ReportStore,
};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn store_error(e: crate::error::StoreError) -> ApiError {
    error!("Store operation failed: {e}");
    internal_error("Database operation failed", &e.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReportStore>,
    pub llm: Arc<LlmClient>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/parse-data", post(parse_data))
        .route("/parse-data/manual", post(parse_manual))
        .route("/reports", get(list_reports))
        .route("/reports/latest", get(latest_report))
        .route("/reports/signals", get(list_signals).delete(delete_signal))
        .route(
            "/reports/events",
            get(list_events).post(create_event).delete(delete_event),
        )
        .route("/reports/{id}", get(get_report))
        .route("/export-all", get(export_all))
        .route("/dashboard", get(dashboard))
        .route("/signals/known", get(list_known_signals))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Lab Report Extraction Service",
        "version": "1.0.0",
        "description": "LLM-backed lab report parsing with signal and event tracking",
        "endpoints": {
            "POST /parse-data": "Upload and parse a lab report file",
            "POST /parse-data/manual": "Parse and persist manually entered lab data",
            "GET /reports": "List all reports, newest first",
            "GET /reports/latest": "Most recent report",
            "GET /reports/{id}": "Fetch one report",
            "GET /reports/signals": "Deduplicated signals across all reports",
            "DELETE /reports/signals?id=ID": "Remove a signal from all reports",
            "GET /reports/events": "Events across all reports",
            "POST /reports/events": "Log a custom event",
            "DELETE /reports/events?id=ID": "Remove an event from all reports",
            "GET /export-all": "Download all data as JSON",
            "GET /dashboard": "Aggregated dashboard indicators",
            "GET /signals/known": "Known biomarker reference table",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn extract_error_response(e: ExtractError) -> ApiError {
    match e {
        ExtractError::EmptyFile => bad_request_error("File is empty or could not be parsed"),
        ExtractError::UnsupportedFile(details) => {
            bad_request_error(&format!("Unsupported file type: {details}"))
        }
        ExtractError::Llm(details) => {
            error!("LLM extraction failed: {details}");
            internal_error("LLM extraction failed", &details)
        }
        ExtractError::Store(e) => store_error(e),
    }
}

async fn parse_data(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Value> {
    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request_error(&format!("Invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request_error(&format!("Failed to read file: {e}")))?;
            file = Some((name, bytes.to_vec()));
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| bad_request_error("No file uploaded"))?;
    info!("Parsing uploaded file: {file_name}");

    let outcome = extract::run_pipeline(&state.llm, state.store.as_ref(), &bytes, &file_name)
        .await
        .map_err(extract_error_response)?;

    let mut body = outcome.parsed;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("recordCount".to_string(), json!(outcome.record_count));
    }
    Ok(Json(body))
}

/// Manual entries arrive as free-form text and go through the same LLM
/// extraction as uploads, with the manual-entry prompt. That prompt fixes
/// the output schema to top-level `signals`/`events` arrays, so the parsed
/// completion is persisted as-is rather than run through the shape
/// normalizer.
async fn parse_manual(State(state): State<AppState>, text: String) -> ApiResult<Value> {
    let prompt = extract::prompt::compose_prompt(&text, "", extract::EntryPoint::Manual);
    let parsed = state
        .llm
        .extract(&prompt)
        .await
        .map_err(extract_error_response)?;

    match state.store.save(&text, &parsed, None).await {
        Ok(Some(report)) => Ok(Json(json!({ "id": report.id, "parsed": parsed }))),
        Ok(None) => Err(bad_request_error("Failed to save manual entry")),
        Err(e) => {
            error!("Manual entry save failed: {e}");
            Err(bad_request_error("Failed to save manual entry"))
        }
    }
}

async fn list_reports(State(state): State<AppState>) -> ApiResult<Value> {
    let reports = state.store.list_all().await.map_err(store_error)?;
    Ok(Json(json!(reports)))
}

async fn latest_report(State(state): State<AppState>) -> ApiResult<Value> {
    match state.store.latest().await.map_err(store_error)? {
        Some(report) => Ok(Json(json!(report))),
        None => Err(not_found_error("No reports found")),
    }
}

async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let id = Uuid::parse_str(&id).map_err(|_| not_found_error("Not found"))?;
    match state.store.get(id).await.map_err(store_error)? {
        Some(report) => Ok(Json(json!(report))),
        None => Err(not_found_error("Not found")),
    }
}

#[derive(Deserialize)]
struct IdQuery {
    id: Option<String>,
}

async fn list_signals(State(state): State<AppState>) -> ApiResult<Value> {
    let signals = state.store.list_signals().await.map_err(store_error)?;
    Ok(Json(json!(signals)))
}

async fn delete_signal(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Value> {
    let id = query.id.ok_or_else(|| bad_request_error("Missing signal id"))?;
    if state.store.delete_signal(&id).await.map_err(store_error)? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(not_found_error("Signal not found"))
    }
}

async fn list_events(State(state): State<AppState>) -> ApiResult<Value> {
    let events = state.store.list_events().await.map_err(store_error)?;
    Ok(Json(json!(events)))
}

/// A custom event is stored as a new single-event report.
async fn create_event(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<Value> {
    let has_type = body.get("type").and_then(Value::as_str).is_some_and(|s| !s.is_empty());
    let has_date = body.get("date").and_then(Value::as_str).is_some_and(|s| !s.is_empty());
    if !has_type || !has_date {
        return Err(bad_request_error("Missing required event fields"));
    }

    let parsed = json!({ "events": [body] });
    match state.store.save("custom event", &parsed, None).await {
        Ok(Some(report)) => {
            let created = report.parsed["events"][0].clone();
            Ok(Json(created))
        }
        Ok(None) => Err(bad_request_error("Failed to save event")),
        Err(e) => Err(store_error(e)),
    }
}

async fn delete_event(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Value> {
    let id = query.id.ok_or_else(|| bad_request_error("Missing event id"))?;
    if state.store.delete_event(&id).await.map_err(store_error)? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(not_found_error("Event not found"))
    }
}

/// Dump every report as a downloadable JSON attachment.
async fn export_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let reports = state.store.list_all().await.map_err(store_error)?;
    let data = json!({ "medicalReports": reports });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"export-all-data.json\"",
            ),
        ],
        data.to_string(),
    )
        .into_response())
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<DashboardSummary> {
    let signals = state.store.list_signals().await.map_err(store_error)?;
    Ok(Json(DashboardSummary::from_signals(&signals)))
}

async fn list_known_signals() -> Json<Value> {
    Json(json!(known_signals::KNOWN_SIGNALS))
}
