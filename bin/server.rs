// Club Registration System - Web Server
// REST API over the allocation engine with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use club_registration::{
    AdmissionError, AllocationError, ClubAvailability, ConfigStore, RankedRegistration, Registrant,
    RegistrantKey, RegistrationRecord, RegistrationStatus, RegistrationSummary, Services, Settings,
    WindowPhase,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
}

#[derive(Serialize)]
struct ApiError {
    kind: &'static str,
    message: String,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn error_response(status: StatusCode, kind: &'static str, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError { kind, message }),
        }),
    )
        .into_response()
}

fn allocation_error(err: AllocationError) -> Response {
    let status = match &err {
        AllocationError::ClubNotFound { .. } | AllocationError::RecordNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        AllocationError::DuplicateRegistration { .. }
        | AllocationError::CapacityExceeded { .. }
        | AllocationError::InvalidTransferTarget { .. } => StatusCode::CONFLICT,
        AllocationError::InvalidRegistrant { .. } => StatusCode::BAD_REQUEST,
        AllocationError::Ledger(e) if err.is_contention() => {
            tracing::warn!(error = %e, "ledger contention");
            StatusCode::CONFLICT
        }
        AllocationError::Ledger(e) => {
            tracing::error!(error = %e, "ledger failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.kind(), err.to_string())
}

fn admission_error(err: AdmissionError) -> Response {
    let kind = match err {
        AdmissionError::NotYetOpen { .. } => "window_not_open",
        AdmissionError::Closed => "window_closed",
    };
    error_response(StatusCode::FORBIDDEN, kind, err.to_string())
}

/// Run engine work off the async executor (SQLite commits fsync).
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Services) -> Result<T, AllocationError> + Send + 'static,
{
    let services = Arc::clone(&state.services);
    match tokio::task::spawn_blocking(move || f(&services)).await {
        Ok(result) => result.map_err(allocation_error),
        Err(e) => {
            tracing::error!(error = %e, "engine task panicked");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "engine task failed".to_string(),
            ))
        }
    }
}

fn respond<T: Serialize>(result: Result<T, Response>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(response) => response,
    }
}

// ============================================================================
// Request / Response bodies
// ============================================================================

#[derive(Deserialize)]
struct SubmitRequest {
    class_id: String,
    seat_number: String,
    display_name: String,
    club_id: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    key: RegistrantKey,
    club_id: String,
    status: RegistrationStatus,
}

#[derive(Deserialize)]
struct KeyBody {
    class_id: String,
    seat_number: String,
}

impl KeyBody {
    fn key(&self) -> Result<RegistrantKey, AllocationError> {
        RegistrantKey::new(&self.class_id, &self.seat_number)
    }
}

#[derive(Deserialize)]
struct MoveRequest {
    keys: Vec<KeyBody>,
    target_club_id: String,
}

#[derive(Deserialize)]
struct ForceAddEntry {
    class_id: String,
    seat_number: String,
    display_name: String,
}

#[derive(Deserialize)]
struct ForceAddRequest {
    registrants: Vec<ForceAddEntry>,
    target_club_id: String,
}

#[derive(Deserialize)]
struct DeleteRequest {
    keys: Vec<KeyBody>,
}

#[derive(Deserialize)]
struct LookupParams {
    name: String,
}

#[derive(Serialize)]
struct WindowResponse {
    opens_at: String,
    closes_at: String,
    phase: WindowPhase,
}

fn collect_keys(bodies: &[KeyBody]) -> Result<Vec<RegistrantKey>, AllocationError> {
    bodies.iter().map(KeyBody::key).collect()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/clubs - Capacity and availability per club
async fn get_clubs(State(state): State<AppState>) -> Response {
    let result: Result<Vec<ClubAvailability>, Response> =
        blocking(&state, |s| Ok(s.query.availability()?)).await;
    respond(result)
}

/// GET /api/stats - Dashboard totals
async fn get_stats(State(state): State<AppState>) -> Response {
    let result: Result<RegistrationSummary, Response> =
        blocking(&state, |s| Ok(s.query.summary()?)).await;
    respond(result)
}

/// GET /api/window - Admission window and current phase
async fn get_window(State(state): State<AppState>) -> Response {
    let window = &state.services.window;
    let response = WindowResponse {
        opens_at: window.opens_at.to_rfc3339(),
        closes_at: window.closes_at.to_rfc3339(),
        phase: window.phase(chrono::Utc::now()),
    };
    (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
}

/// POST /api/registrations - Submit (only while the window is open)
async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Response {
    if let Err(e) = state.services.window.check_now() {
        return admission_error(e);
    }

    let result = blocking(&state, move |s| {
        let key = RegistrantKey::new(&req.class_id, &req.seat_number)?;
        let status = s.engine.submit(&key, &req.club_id, &req.display_name)?;
        Ok(SubmitResponse {
            key,
            club_id: req.club_id,
            status,
        })
    })
    .await;
    respond(result)
}

/// DELETE /api/registrations/:class/:seat - Cancel
async fn cancel(
    State(state): State<AppState>,
    Path((class_id, seat_number)): Path<(String, String)>,
) -> Response {
    let result: Result<RegistrationRecord, Response> = blocking(&state, move |s| {
        let key = RegistrantKey::new(&class_id, &seat_number)?;
        s.engine.cancel(&key)
    })
    .await;
    respond(result)
}

/// GET /api/lookup?name= - Find registrations by display name
async fn lookup(State(state): State<AppState>, Query(params): Query<LookupParams>) -> Response {
    let result: Result<Vec<RankedRegistration>, Response> =
        blocking(&state, move |s| Ok(s.query.lookup_by_name(&params.name)?)).await;
    respond(result)
}

/// GET /api/clubs/:id/roster - Ranked roster
async fn roster(State(state): State<AppState>, Path(club_id): Path<String>) -> Response {
    let result: Result<Vec<RankedRegistration>, Response> = blocking(&state, move |s| {
        if s.clubs.get_club(&club_id).is_none() {
            return Err(AllocationError::ClubNotFound { club_id });
        }
        Ok(s.query.roster(&club_id)?)
    })
    .await;
    respond(result)
}

/// POST /api/admin/move - Batch move
async fn admin_move(State(state): State<AppState>, Json(req): Json<MoveRequest>) -> Response {
    let result: Result<Vec<RegistrationRecord>, Response> = blocking(&state, move |s| {
        let keys = collect_keys(&req.keys)?;
        s.engine.batch_move(&keys, &req.target_club_id)
    })
    .await;
    respond(result)
}

/// POST /api/admin/force-add - Batch enroll
async fn admin_force_add(
    State(state): State<AppState>,
    Json(req): Json<ForceAddRequest>,
) -> Response {
    let result: Result<Vec<RegistrationRecord>, Response> = blocking(&state, move |s| {
        let registrants = req
            .registrants
            .iter()
            .map(|r| Registrant::new(RegistrantKey::new(&r.class_id, &r.seat_number)?, &r.display_name))
            .collect::<Result<Vec<_>, _>>()?;
        s.engine.batch_force_add(&registrants, &req.target_club_id)
    })
    .await;
    respond(result)
}

/// POST /api/admin/delete - Batch delete
async fn admin_delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> Response {
    let result: Result<Vec<RegistrationRecord>, Response> = blocking(&state, move |s| {
        let keys = collect_keys(&req.keys)?;
        s.engine.batch_delete(&keys)
    })
    .await;
    respond(result)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = Settings::default_path();
    let settings = Settings::load(&config_path)?;
    let services = Services::open(&settings)?;
    tracing::info!(
        config = %config_path.display(),
        database = %settings.database_path.display(),
        clubs = services.clubs.count(),
        "services ready"
    );

    let state = AppState {
        services: Arc::new(services),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/clubs", get(get_clubs))
        .route("/clubs/:id/roster", get(roster))
        .route("/stats", get(get_stats))
        .route("/window", get(get_window))
        .route("/registrations", post(submit))
        .route("/registrations/:class/:seat", delete(cancel))
        .route("/lookup", get(lookup))
        .route("/admin/move", post(admin_move))
        .route("/admin/force-add", post(admin_force_add))
        .route("/admin/delete", post(admin_delete))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = std::env::var("CLUB_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
