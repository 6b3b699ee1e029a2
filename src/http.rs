//! HTTP server: REST surface plus the relay upgrade endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::allowlist::PackageSpec;
use crate::error::{GatewayError, Result};
use crate::jobs::dispatcher::SubmitRequest;
use crate::jobs::store::JobStore;
use crate::relay;
use crate::state::AppState;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Extra request-body headroom over the upload cap for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    // The framework's default body limit is below the upload cap; lift it on
    // the upload route so the store's own size check is the enforcement
    // point and oversize uploads get the taxonomy's 413, not a parse error.
    let upload_body_limit = state.config.max_upload_bytes as usize + MULTIPART_OVERHEAD;
    Router::new()
        .route("/allowlist", get(get_allowlist))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/files/:room_id", get(list_files))
        .route("/files/:room_id/:file_name", delete(delete_file))
        .route("/execute", post(execute))
        .route("/install", post(install))
        .route("/status/:job_id", get(get_status))
        .route("/health", get(health))
        .route("/ws/:room_id", get(relay::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    spawn_store_purger(Arc::clone(&state.store));
    state.rooms.spawn_sweeper();

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Periodically delete expired job status records.
fn spawn_store_purger(store: Arc<dyn JobStore>) {
    tokio::spawn(async move {
        let mut interval = interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired job records"),
                Err(err) => warn!(%err, "job record purge failed"),
            }
        }
    });
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().timestamp_millis() }))
}

async fn get_allowlist(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "packages": state.allowlist.packages() }))
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut room_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| GatewayError::Validation(err.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| GatewayError::Validation("file name required".to_string()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| GatewayError::Validation(err.to_string()))?;
                file = Some((name, bytes.to_vec()));
            }
            Some("roomId") => {
                room_id = field.text().await.ok();
            }
            _ => {}
        }
    }

    let (name, bytes) =
        file.ok_or_else(|| GatewayError::Validation("no file uploaded".to_string()))?;
    let room_id =
        room_id.ok_or_else(|| GatewayError::Validation("room ID required".to_string()))?;

    let file_name = state.uploads.save(&room_id, &name, &bytes).await?;
    Ok(Json(json!({ "success": true, "fileName": file_name })))
}

async fn list_files(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>> {
    let files = state.uploads.list(&room_id).await?;
    Ok(Json(json!({ "files": files })))
}

async fn delete_file(
    State(state): State<AppState>,
    Path((room_id, file_name)): Path<(String, String)>,
) -> Result<Json<Value>> {
    state.uploads.delete(&room_id, &file_name).await?;
    Ok(Json(json!({ "success": true })))
}

async fn execute(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Value>> {
    // Cheapest check first: shed rate-limited clients before touching the
    // payload.
    state.limiter.check(addr.ip())?;
    let job_id = state.dispatcher.submit(req).await?;
    Ok(Json(json!({ "jobId": job_id })))
}

#[derive(Deserialize)]
struct InstallRequest {
    #[serde(default)]
    packages: Vec<PackageSpec>,
}

/// Validation-only: checks names against the allowlist and echoes them.
/// Nothing is installed here; the worker's execution environment provides
/// actual availability. Kept as observed pending product clarification.
async fn install(
    State(state): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<Value>> {
    if req.packages.is_empty() {
        return Err(GatewayError::Validation(
            "packages array is required".to_string(),
        ));
    }
    let records: Vec<_> = req
        .packages
        .into_iter()
        .map(PackageSpec::normalize)
        .collect();
    let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    state.allowlist.validate(&names)?;

    info!(packages = ?names, "packages validated");
    Ok(Json(json!({ "success": true, "packages": names })))
}

async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<crate::jobs::JobStatusRecord>> {
    // A malformed id can never name a job, so it reads as absent rather
    // than as a parse rejection.
    let job_id = job_id
        .parse::<Uuid>()
        .map_err(|_| GatewayError::NotFound("job not found".to_string()))?;
    let record = state
        .store
        .get(job_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("job not found".to_string()))?;
    Ok(Json(record))
}
