//! Room Division Command Center - hotel report ingestion and KPI server.

mod coerce;
mod column_mapper;
mod config;
mod identity;
mod ingest;
mod metrics;
mod realtime_db;
mod report_type;
mod schema;
mod sheet_parser;
mod upload_store;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::AppConfig;
use identity::{AuthError, IdentityVerifier};
use chrono::NaiveDate;
use metrics::{AnalyticsMetrics, Period};
use realtime_db::RealtimeDbStore;
use report_type::{CanonicalField, FieldKind, Module, ReportType};
use schema::{Upload, UploadStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_store::{process_upload, MemoryUploadStore, UploadError, UploadReceipt, UploadRequest, UploadStore};

const SERVICE_NAME: &str = "Room Division Command Center";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn UploadStore>,
    identity: IdentityVerifier,
    config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "command_center=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn UploadStore> = match config.firebase.clone() {
        Some(firebase) => {
            info!("Realtime Database store at {}", firebase.database_url);
            Arc::new(RealtimeDbStore::new(firebase))
        }
        None => Arc::new(MemoryUploadStore::new()),
    };

    let state = AppState {
        store,
        identity: IdentityVerifier::new(config.api_key.clone(), config.allow_anonymous_uploads),
        config: Arc::new(config),
    };
    let bind_addr = state.config.bind_addr;

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/report-types", get(list_report_types))
        .route("/api/upload", post(upload_report))
        .route("/api/uploads", get(list_uploads))
        .route("/api/analytics", get(analytics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct Health {
    ok: bool,
    status: &'static str,
    timestamp: String,
    service: &'static str,
    version: &'static str,
}

/// Health check endpoint.
async fn health() -> Json<Health> {
    Json(Health {
        ok: true,
        status: "healthy",
        timestamp: schema::now_iso8601(),
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct FieldInfo {
    name: CanonicalField,
    kind: FieldKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportTypeInfo {
    report_type: ReportType,
    fields: Vec<FieldInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModuleInfo {
    module: Module,
    report_types: Vec<ReportTypeInfo>,
}

/// Report types grouped by module, with their canonical fields.
async fn list_report_types() -> Json<Envelope<Vec<ModuleInfo>>> {
    let modules = Module::ALL
        .into_iter()
        .map(|module| ModuleInfo {
            module,
            report_types: module
                .report_types()
                .into_iter()
                .map(|report_type| ReportTypeInfo {
                    report_type,
                    fields: report_type
                        .schema()
                        .iter()
                        .map(|&name| FieldInfo { name, kind: name.kind() })
                        .collect(),
                })
                .collect(),
        })
        .collect();
    Json(Envelope::ok(modules))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    module: Option<String>,
    report_type: Option<String>,
}

/// Upload a spreadsheet, ingest it and persist the normalized rows.
async fn upload_report(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Envelope<UploadReceipt>>, ApiError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let uploaded_by = state.identity.verify(authorization).await?;

    let mut filename = None;
    let mut file_data = Vec::new();
    let mut module = query.module;
    let mut report_type = query.report_type;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(e.status(), "INVALID_PARAMS", format!("Multipart error: {}", e))
    })? {
        match field.name() {
            Some("file") => {
                filename = Some(field.file_name().unwrap_or("upload").to_string());
                file_data = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        ApiError::new(e.status(), "INVALID_PARAMS", format!("Failed to read file: {}", e))
                    })?
                    .to_vec();
            }
            Some("module") => module = Some(field_text(field).await?),
            Some("reportType") => report_type = Some(field_text(field).await?),
            _ => {}
        }
    }

    let Some(filename) = filename else {
        return Err(ApiError::bad_request("NO_FILE", "No file provided"));
    };

    let (module, report_type) = match (non_blank(module), non_blank(report_type)) {
        (Some(m), Some(r)) => (m, r),
        _ => {
            return Err(ApiError::bad_request(
                "MISSING_PARAMS",
                "Missing module or reportType",
            ))
        }
    };
    let module: Module = module
        .parse()
        .map_err(|_| ApiError::bad_request("INVALID_PARAMS", format!("Unknown module: {}", module)))?;
    let report_type: ReportType = report_type.parse().map_err(|_| {
        ApiError::bad_request("INVALID_PARAMS", format!("Unknown report type: {}", report_type))
    })?;

    info!(
        "Received file: {} ({} bytes) as {} / {} from {}",
        filename,
        file_data.len(),
        module,
        report_type,
        uploaded_by
    );

    let receipt = process_upload(
        state.store.as_ref(),
        UploadRequest {
            uploaded_by,
            module,
            report_type,
            filename,
            data: file_data,
        },
    )
    .await?;

    Ok(Json(Envelope::ok(receipt)))
}

#[derive(Deserialize, Default)]
struct UploadsQuery {
    module: Option<String>,
}

/// Upload history, newest first.
async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<UploadsQuery>,
) -> Result<Json<Envelope<Vec<Upload>>>, ApiError> {
    let module = parse_filter::<Module>(query.module, "module")?;
    let uploads = state
        .store
        .list_uploads()
        .await
        .map_err(ApiError::internal("SERVER_ERROR"))?
        .into_iter()
        .filter(|u| module.map_or(true, |m| u.module == m))
        .collect();
    Ok(Json(Envelope::ok(uploads)))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    upload_id: Option<String>,
    module: Option<String>,
    report_type: Option<String>,
    available_rooms: Option<u32>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsReport {
    upload_ids: Vec<String>,
    row_count: usize,
    period: Period,
    #[serde(flatten)]
    metrics: AnalyticsMetrics,
}

/// KPIs over the rows of the selected completed uploads, optionally limited
/// to rows dated within `startDate..=endDate`.
async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Envelope<AnalyticsReport>>, ApiError> {
    let module = parse_filter::<Module>(query.module, "module")?;
    let report_type = parse_filter::<ReportType>(query.report_type, "reportType")?;
    let period = Period {
        start_date: parse_date(query.start_date, "startDate")?,
        end_date: parse_date(query.end_date, "endDate")?,
    };
    if let (Some(start), Some(end)) = (period.start_date, period.end_date) {
        if start > end {
            return Err(ApiError::bad_request(
                "INVALID_PARAMS",
                format!("startDate {} is after endDate {}", start, end),
            ));
        }
    }

    let uploads: Vec<Upload> = match non_blank(query.upload_id) {
        Some(id) => {
            let upload = state
                .store
                .get_upload(&id)
                .await
                .map_err(ApiError::internal("ANALYTICS_ERROR"))?
                .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Upload not found: {}", id)))?;
            if upload.status != UploadStatus::Completed {
                return Err(ApiError::new(
                    StatusCode::CONFLICT,
                    "UPLOAD_NOT_READY",
                    format!("Upload {} is {}", upload.id, upload.status),
                ));
            }
            vec![upload]
        }
        None => state
            .store
            .list_uploads()
            .await
            .map_err(ApiError::internal("ANALYTICS_ERROR"))?,
    };

    let selected: Vec<Upload> = uploads
        .into_iter()
        .filter(|u| u.status == UploadStatus::Completed)
        .filter(|u| module.map_or(true, |m| u.module == m))
        .filter(|u| report_type.map_or(true, |t| u.report_type == t))
        .collect();

    let mut rows = Vec::new();
    for upload in &selected {
        let upload_rows = state
            .store
            .get_rows(&upload.id)
            .await
            .map_err(ApiError::internal("ANALYTICS_ERROR"))?;
        if period.is_unbounded() {
            rows.extend(upload_rows);
            continue;
        }
        // Undated rows fall on the day they were uploaded.
        let uploaded_on = upload
            .uploaded_at
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        rows.extend(upload_rows.into_iter().filter(|row| {
            metrics::row_date(row)
                .or(uploaded_on)
                .map_or(false, |d| period.contains(d))
        }));
    }

    let rooms = query.available_rooms.unwrap_or(state.config.available_rooms);
    let metrics = metrics::compute_analytics(&rows, rooms);

    Ok(Json(Envelope::ok(AnalyticsReport {
        upload_ids: selected.into_iter().map(|u| u.id).collect(),
        row_count: rows.len(),
        period,
        metrics,
    })))
}

// ============================================================================
// Helper functions
// ============================================================================

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(|e| {
        ApiError::new(e.status(), "INVALID_PARAMS", format!("Failed to read form field: {}", e))
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Optional `YYYY-MM-DD` query parameter.
fn parse_date(value: Option<String>, name: &str) -> Result<Option<NaiveDate>, ApiError> {
    match non_blank(value) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(&v, "%Y-%m-%d").map(Some).map_err(|_| {
            ApiError::bad_request("INVALID_PARAMS", format!("Invalid {}: {} (expected YYYY-MM-DD)", name, v))
        }),
    }
}

fn parse_filter<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<Option<T>, ApiError> {
    match non_blank(value) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request("INVALID_PARAMS", format!("Unknown {}: {}", name, v))),
    }
}

// ============================================================================
// Response envelope and errors
// ============================================================================

#[derive(Debug, Serialize)]
struct Envelope<T> {
    ok: bool,
    data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Error response: `{ "ok": false, "error": { "code", "message" } }`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// Store failure reported under the route's error `code`.
    fn internal(code: &'static str) -> impl Fn(anyhow::Error) -> Self {
        move |e| {
            error!("Store request failed ({}): {:#}", code, e);
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, format!("{:#}", e))
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, e.code(), e.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match &e {
            UploadError::Ingest { source, .. } => Self::bad_request(source.code(), e.to_string()),
            UploadError::Persist { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "UPLOAD_ERROR", e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "ok": false,
            "error": { "code": self.code, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}
