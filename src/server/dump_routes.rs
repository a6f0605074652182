//! HTTP routes for requesting, listing, downloading and deleting dumps.

use std::io::Read;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::blob_store::BlobStore;
use crate::dump_manager::{Actor, DownloadPlan, DumpError, GenerateDumpRequest};
use crate::dump_registry::DumpFilter;

use super::state::{GuardedDumpManager, ServerState};

const STREAM_BUFFER_SIZE: usize = 64 * 1024;
const STREAM_CHANNEL_CAPACITY: usize = 4;

#[derive(Serialize)]
struct GenerateDumpResponse {
    filename: Option<String>,
}

impl IntoResponse for DumpError {
    fn into_response(self) -> Response {
        let status = match &self {
            DumpError::InvalidType(_) => StatusCode::BAD_REQUEST,
            DumpError::PermissionDenied => StatusCode::FORBIDDEN,
            DumpError::NotFound(_) => StatusCode::NOT_FOUND,
            DumpError::NotDeletable(_) => StatusCode::CONFLICT,
            DumpError::DeleteFailed(_) | DumpError::Internal(_) => {
                error!("Dump request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

async fn generate_dump(
    actor: Actor,
    State(manager): State<GuardedDumpManager>,
    Json(body): Json<GenerateDumpRequest>,
) -> Response {
    match run_blocking(move || manager.generate(&actor, &body)).await {
        Ok(filename) => Json(GenerateDumpResponse { filename }).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_dumps(
    actor: Actor,
    State(manager): State<GuardedDumpManager>,
    Query(filter): Query<DumpFilter>,
) -> Response {
    match run_blocking(move || manager.list(&actor, &filter)).await {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_dump(
    actor: Actor,
    State(manager): State<GuardedDumpManager>,
    Path((dump_type, filename)): Path<(String, String)>,
) -> Response {
    match run_blocking(move || manager.delete(&actor, &dump_type, &filename)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn download_dump(
    actor: Actor,
    State(manager): State<GuardedDumpManager>,
    Path(filename): Path<String>,
) -> Response {
    let store = manager.storage().blob_store().clone();
    let opened = {
        let store = store.clone();
        run_blocking(move || {
            let plan = manager.open_download(&actor, &filename)?;
            let content_length = if plan.chunked {
                None
            } else {
                store
                    .size(&plan.keys[0])
                    .map_err(|err| anyhow::anyhow!("Failed to stat {}: {}", plan.keys[0], err))?
            };
            Ok((plan, content_length))
        })
        .await
    };
    let (plan, content_length) = match opened {
        Ok(opened) => opened,
        Err(err) => return err.into_response(),
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::EXPIRES, "Thu, 01 Jan 1970 00:00:00 GMT")
        .header(
            header::CACHE_CONTROL,
            "no-cache, no-store, max-age=0, must-revalidate",
        )
        .header(header::PRAGMA, "no-cache")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", plan.filename),
        )
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if let Some(length) = content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    match response.body(stream_plan(store, plan)) {
        Ok(response) => response,
        Err(err) => {
            error!("Failed to build download response: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run registry and store work off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, DumpError>
where
    F: FnOnce() -> Result<T, DumpError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| DumpError::Internal(anyhow::anyhow!("Blocking task failed: {}", err)))?
}

/// Stream every key of the plan in order without buffering whole blobs.
fn stream_plan(store: Arc<dyn BlobStore>, plan: DownloadPlan) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        for key in &plan.keys {
            let mut reader = match store.open(key) {
                Ok(reader) => reader,
                Err(err) => {
                    error!("Failed to open {} for download: {}", key, err);
                    let _ = tx.blocking_send(Err(std::io::Error::other(err.to_string())));
                    return;
                }
            };
            let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
            loop {
                let read = match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        error!("Failed reading {} for download: {}", key, err);
                        let _ = tx.blocking_send(Err(err));
                        return;
                    }
                };
                if tx
                    .blocking_send(Ok(Bytes::copy_from_slice(&buffer[..read])))
                    .is_err()
                {
                    warn!("Client went away while downloading {}", plan.filename);
                    return;
                }
            }
        }
        debug!("Finished streaming {}", plan.filename);
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}

pub fn make_dump_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", get(list_dumps).post(generate_dump))
        // The router needs one name for the first segment: a filename on
        // download, a dump type on delete
        .route("/{name}/download", get(download_dump))
        .route("/{name}/{filename}", delete(delete_dump))
        .with_state(state)
}
