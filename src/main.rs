//! Coffee Import - beneficiary masterlist and farm-coordinate import server.

mod auth;
mod cleanse;
mod cleansers;
mod config;
mod coordinates;
mod error;
mod farm_coordinates;
mod import_schema;
mod importer;
mod merged_cells;
mod sheet_parser;
mod store;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use auth::{AuthService, LoginRequest};
use config::{AppConfig, ImportTemplate, TemplateStore};
use coordinates::{decimal_to_dms, Axis};
use error::AppError;
use farm_coordinates::{cleanse_farm_coordinates, group_plots, MIN_POLYGON_POINTS};
use import_schema::{
    CleansedBeneficiaryRow, ImportFailure, ImportRow, ImportSuccess, PlotCoordinatePoint, RowError,
};
use serde::{Deserialize, Serialize};
use sheet_parser::{keyed_rows, read_sheet, SpreadsheetKind};
use std::sync::Arc;
use store::{memory::MemoryStore, mysql::MySqlStore, BeneficiaryStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn BeneficiaryStore>,
    templates: Arc<TemplateStore>,
    auth: Arc<AuthService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "coffee_import=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let templates = TemplateStore::load_from_dir(std::path::Path::new(&config.template_dir))?;
    info!("Loaded {} templates: {:?}", templates.list().len(), templates.list());

    let store: Arc<dyn BeneficiaryStore> = match &config.database_url {
        Some(url) => {
            let mysql = MySqlStore::connect(url).await?;
            mysql.ensure_schema().await?;
            Arc::new(mysql)
        }
        None => {
            warn!("DATABASE_URL not set, imports are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    info!("Using {} store", store.backend_name());

    let state = AppState {
        store,
        templates: Arc::new(templates),
        auth: Arc::new(AuthService::new(&config)),
    };

    let app = build_router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let protected = Router::new()
        .route("/api/import/preview", post(preview_import))
        .route("/api/import/confirm", post(confirm_import))
        .route("/api/import/farm-coordinates/preview", post(preview_farm_coordinates))
        .route("/api/import/farm-coordinates/confirm", post(confirm_farm_coordinates))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/:name", get(get_template))
        .route("/api/coordinates/dms", get(to_dms))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Envelope used by every JSON endpoint.
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct TokenData {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<TokenData>>, AppError> {
    let token = state.auth.login(&request)?;
    Ok(ApiResponse::ok(TokenData { token }))
}

/// List available templates.
async fn list_templates(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.templates.list())
}

/// Get a specific template.
async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ImportTemplate>, StatusCode> {
    state
        .templates
        .get(Some(&name))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct DmsQuery {
    lat: f64,
    lng: f64,
}

#[derive(Serialize)]
struct DmsPair {
    lat: String,
    lng: String,
}

async fn to_dms(Query(query): Query<DmsQuery>) -> Result<Json<ApiResponse<DmsPair>>, AppError> {
    if !Axis::Latitude.contains(query.lat) || !Axis::Longitude.contains(query.lng) {
        return Err(AppError::BadRequest(
            "lat must be within ±90 and lng within ±180".into(),
        ));
    }
    Ok(ApiResponse::ok(DmsPair {
        lat: decimal_to_dms(query.lat, Axis::Latitude),
        lng: decimal_to_dms(query.lng, Axis::Longitude),
    }))
}

#[derive(Deserialize)]
struct PreviewQuery {
    template: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewData {
    preview_data: Vec<CleansedBeneficiaryRow>,
    errors: Vec<RowError>,
    has_errors: bool,
    total_rows: usize,
    valid_rows: usize,
    invalid_rows: usize,
    skipped_rows: usize,
}

/// Upload a beneficiary sheet and return the cleansed preview.
async fn preview_import(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<PreviewData>>, AppError> {
    let template = state
        .templates
        .get(query.template.as_deref())
        .ok_or_else(|| AppError::UnknownTemplate {
            name: query.template.clone().unwrap_or_default(),
            available: state.templates.list(),
        })?;

    let upload = read_upload(multipart).await?;
    info!(
        "Preview of {} ({} bytes) with template {}",
        upload.filename,
        upload.data.len(),
        template.name
    );

    let sheet = read_sheet(upload.kind, &upload.data).map_err(|e| {
        debug!("Unreadable sheet {}: {:#}", upload.filename, e);
        AppError::EmptySheet
    })?;
    let rows = keyed_rows(&sheet, template.header_offset).map_err(|e| {
        debug!("No data rows in {}: {:#}", upload.filename, e);
        AppError::EmptySheet
    })?;

    let outcome = cleanse::cleanse_data(&rows, &template, template.name_strategy.parser());

    Ok(ApiResponse::ok(PreviewData {
        has_errors: !outcome.errors.is_empty(),
        total_rows: outcome.total_rows(),
        valid_rows: outcome.cleaned_data.len(),
        invalid_rows: outcome.errors.len(),
        skipped_rows: outcome.skipped_rows,
        preview_data: outcome.cleaned_data,
        errors: outcome.errors,
    }))
}

#[derive(Serialize)]
struct ImportSummary {
    total: usize,
    success: usize,
    failed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmData {
    summary: ImportSummary,
    success_records: Vec<ImportSuccess>,
    failed_records: Vec<ImportFailure>,
}

/// Persist reviewed rows in one transaction.
async fn confirm_import(
    State(state): State<AppState>,
    Json(rows): Json<Vec<ImportRow>>,
) -> Result<Json<ApiResponse<ConfirmData>>, AppError> {
    if rows.is_empty() {
        return Err(AppError::BadRequest("No rows to import.".into()));
    }

    let names = state.templates.default_name_strategy().parser();
    let result = importer::confirm_import(state.store.as_ref(), rows, names).await?;

    Ok(ApiResponse::ok(ConfirmData {
        summary: ImportSummary {
            total: result.total_processed,
            success: result.success.len(),
            failed: result.failed.len(),
        },
        success_records: result.success,
        failed_records: result.failed,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlotSummary {
    plot_id: String,
    farmer_name: String,
    point_count: usize,
    valid_polygon: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoordinatePreview {
    total_points: usize,
    plots: Vec<PlotSummary>,
    points: Vec<PlotCoordinatePoint>,
}

/// Upload a GPS survey sheet and return the parsed plot points.
async fn preview_farm_coordinates(
    multipart: Multipart,
) -> Result<Json<ApiResponse<CoordinatePreview>>, AppError> {
    let upload = read_upload(multipart).await?;
    let sheet = read_sheet(upload.kind, &upload.data).map_err(|e| {
        debug!("Unreadable coordinate sheet {}: {:#}", upload.filename, e);
        AppError::EmptySheet
    })?;

    let points = cleanse_farm_coordinates(&sheet.to_string_rows());
    let plots = group_plots(&points)
        .into_iter()
        .map(|plot| PlotSummary {
            valid_polygon: plot.is_valid_polygon(),
            point_count: plot.points.len(),
            plot_id: plot.plot_id,
            farmer_name: plot.farmer_name,
        })
        .collect();

    Ok(ApiResponse::ok(CoordinatePreview {
        total_points: points.len(),
        plots,
        points,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectedPlot {
    plot_id: String,
    farmer_name: String,
    reason: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoordinateSaveData {
    saved_plots: Vec<String>,
    rejected_plots: Vec<RejectedPlot>,
}

/// Replace each plot's boundary with the posted points.
async fn confirm_farm_coordinates(
    State(state): State<AppState>,
    Json(points): Json<Vec<PlotCoordinatePoint>>,
) -> Result<Json<ApiResponse<CoordinateSaveData>>, AppError> {
    if points.is_empty() {
        return Err(AppError::BadRequest("No coordinates to save.".into()));
    }

    let mut saved_plots = Vec::new();
    let mut rejected_plots = Vec::new();

    for plot in group_plots(&points) {
        if !plot.is_valid_polygon() {
            rejected_plots.push(RejectedPlot {
                reason: format!(
                    "A plot needs at least {} points, got {}",
                    MIN_POLYGON_POINTS,
                    plot.points.len()
                ),
                plot_id: plot.plot_id,
                farmer_name: plot.farmer_name,
            });
            continue;
        }
        state.store.save_plot(&plot).await?;
        saved_plots.push(plot.plot_id);
    }

    info!(
        "Saved {} plots, rejected {}",
        saved_plots.len(),
        rejected_plots.len()
    );
    Ok(ApiResponse::ok(CoordinateSaveData {
        saved_plots,
        rejected_plots,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

struct Upload {
    filename: String,
    kind: SpreadsheetKind,
    data: Vec<u8>,
}

/// Pull the `file` field out of a multipart body and check its format.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let kind = SpreadsheetKind::detect(&filename, content_type.as_deref())
            .ok_or_else(|| AppError::UnsupportedFile(filename.clone()))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?
            .to_vec();
        if data.is_empty() {
            return Err(AppError::EmptySheet);
        }

        return Ok(Upload {
            filename,
            kind,
            data,
        });
    }

    Err(AppError::BadRequest("No file uploaded".into()))
}
