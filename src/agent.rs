use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, IF_NONE_MATCH, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::fsutil;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_PAGE: usize = 200;
const MAX_PAGE: usize = 1000;

/* ============================= STATE ============================= */

#[derive(Clone)]
pub struct AgentState {
    pub data_root: PathBuf,
    pub read_only: bool,
}

pub fn build_router(state: AgentState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { (StatusCode::OK, "ok") }))
        .route("/v1/tree", get(handle_tree))
        .route("/v1/file", get(handle_get_file).delete(handle_delete))
        .route("/v1/upload", post(handle_upload))
        .route("/v1/empty", post(handle_empty))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/* ============================= TREE ============================= */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeEntry {
    name: String,
    path: String,
    is_dir: bool,
    size: u64,
    #[serde(rename = "mod")]
    modified: DateTime<Utc>,
    uid: u32,
    gid: u32,
    mode: u32,
}

#[derive(Debug, Default, Deserialize)]
struct TreeQuery {
    #[serde(default)]
    path: String,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn handle_tree(State(state): State<AgentState>, Query(q): Query<TreeQuery>) -> Response {
    let mut limit = q.limit.unwrap_or(DEFAULT_PAGE);
    if limit == 0 || limit > MAX_PAGE {
        limit = DEFAULT_PAGE;
    }
    let offset = q.offset.unwrap_or(0);

    let full = match fsutil::join_secure(&state.data_root, &q.path) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %q.path, error = %e, "join_secure_failed");
            return (StatusCode::BAD_REQUEST, "bad path").into_response();
        }
    };

    let meta = match tokio::fs::metadata(&full).await {
        Ok(m) => m,
        Err(_) => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    if !meta.is_dir() {
        return (StatusCode::BAD_REQUEST, "not a directory").into_response();
    }

    let mut reader = match tokio::fs::read_dir(&full).await {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %full.display(), error = %e, "read_dir_failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "read dir error").into_response();
        }
    };

    let mut entries: Vec<TreeEntry> = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH);
        entries.push(TreeEntry {
            path: join_request_path(&q.path, &name),
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.permissions().mode() & 0o777,
            name,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let total = entries.len();
    let start = offset.min(total);
    let end = (offset + limit).min(total);
    let page = &entries[start..end];

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Total-Count",
        total.to_string().parse().expect("count is ascii"),
    );
    (StatusCode::OK, headers, axum::Json(page)).into_response()
}

fn join_request_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() || base == "." {
        format!("/{name}")
    } else if base.starts_with('/') {
        format!("{base}/{name}")
    } else {
        format!("/{base}/{name}")
    }
}

/* ============================= FILE GET ============================= */

#[derive(Debug, Default, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

async fn handle_get_file(
    State(state): State<AgentState>,
    Query(q): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    let full = match fsutil::join_secure(&state.data_root, &q.path) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %q.path, error = %e, "join_secure_failed");
            return (StatusCode::BAD_REQUEST, "bad path").into_response();
        }
    };

    let meta = match tokio::fs::metadata(&full).await {
        Ok(m) => m,
        Err(_) => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    if meta.is_dir() {
        return (StatusCode::BAD_REQUEST, "is a directory").into_response();
    }
    let size = meta.len();

    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let etag = format!("\"{mtime_ns:x}-{size:x}\"");

    if let Some(inm) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok())
        && inm == etag
    {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let mut file = match tokio::fs::File::open(&full).await {
        Ok(f) => f,
        Err(_) => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };

    let mut builder = Response::builder()
        .header(ACCEPT_RANGES, "bytes")
        .header(ETAG, &etag)
        .header(CONTENT_TYPE, mime_by_name(&q.path));

    if let Some(range) = headers.get(RANGE).and_then(|v| v.to_str().ok()) {
        let Some((start, end)) = parse_range(range, size) else {
            warn!(range = %range, "invalid_range");
            return (StatusCode::RANGE_NOT_SATISFIABLE, "invalid range").into_response();
        };
        if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
            return (StatusCode::INTERNAL_SERVER_ERROR, "seek").into_response();
        }
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(CONTENT_RANGE, format!("bytes {start}-{}/{size}", end - 1))
            .header(CONTENT_LENGTH, end - start);
        let stream = ReaderStream::new(file.take(end - start));
        return builder
            .body(Body::from_stream(stream))
            .expect("static response headers are valid");
    }

    builder = builder.status(StatusCode::OK).header(CONTENT_LENGTH, size);
    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .expect("static response headers are valid")
}

/// Parses a single `bytes=` range against a known size, returning a
/// half-open `[start, end)` interval.
fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (a, b) = spec.split_once('-')?;
    if a.is_empty() && b.is_empty() {
        return None;
    }
    if a.is_empty() {
        // suffix form: last N bytes
        let n: u64 = b.parse().ok()?;
        if n == 0 {
            return None;
        }
        let n = n.min(size);
        return Some((size - n, size));
    }
    let start: u64 = a.parse().ok()?;
    if start >= size {
        return None;
    }
    if b.is_empty() {
        return Some((start, size));
    }
    let end: u64 = b.parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, end.min(size - 1) + 1))
}

fn mime_by_name(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
    {
        "txt" | "log" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/* ============================= MUTATIONS ============================= */

async fn handle_delete(State(state): State<AgentState>, Query(q): Query<PathQuery>) -> Response {
    if state.read_only {
        return (StatusCode::FORBIDDEN, "read-only").into_response();
    }
    let full = match fsutil::join_secure(&state.data_root, &q.path) {
        Ok(p) => p,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad path").into_response(),
    };

    let removed = match tokio::fs::symlink_metadata(&full).await {
        // nothing there: deletion is already done
        Err(_) => Ok(()),
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full).await,
        Ok(_) => tokio::fs::remove_file(&full).await,
    };
    match removed {
        Ok(()) => {
            info!(path = %q.path, "deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(path = %full.display(), error = %e, "delete_failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "delete failed").into_response()
        }
    }
}

async fn handle_upload(
    State(state): State<AgentState>,
    Query(q): Query<PathQuery>,
    mut multipart: Multipart,
) -> Response {
    if state.read_only {
        return (StatusCode::FORBIDDEN, "read-only").into_response();
    }
    let dir = match fsutil::join_secure(&state.data_root, &q.path) {
        Ok(p) => p,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad path").into_response(),
    };
    if tokio::fs::create_dir_all(&dir).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "mkdir").into_response();
    }

    let mut written = 0usize;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "multipart_read_failed");
                return (StatusCode::BAD_REQUEST, "bad form").into_response();
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let Some(file_name) = field
            .file_name()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        let dst = match fsutil::join_secure(&dir, &file_name) {
            Ok(p) => p,
            Err(_) => return (StatusCode::BAD_REQUEST, "bad name").into_response(),
        };
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %file_name, error = %e, "multipart_body_failed");
                return (StatusCode::BAD_REQUEST, "bad form").into_response();
            }
        };
        if let Err(e) = tokio::fs::write(&dst, &bytes).await {
            warn!(dst = %dst.display(), error = %e, "write_failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "write").into_response();
        }
        info!(dst = %dst.display(), bytes = bytes.len(), "uploaded");
        written += 1;
    }

    if written == 0 {
        return (StatusCode::BAD_REQUEST, "no file").into_response();
    }
    StatusCode::CREATED.into_response()
}

async fn handle_empty(State(state): State<AgentState>, Query(q): Query<PathQuery>) -> Response {
    if state.read_only {
        return (StatusCode::FORBIDDEN, "read-only").into_response();
    }
    let dir = match fsutil::join_secure(&state.data_root, &q.path) {
        Ok(p) => p,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad path").into_response(),
    };

    let meta = match tokio::fs::metadata(&dir).await {
        Ok(m) => m,
        Err(_) => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    if !meta.is_dir() {
        return (StatusCode::BAD_REQUEST, "not a directory").into_response();
    }

    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(r) => r,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "read dir").into_response(),
    };
    while let Ok(Some(entry)) = reader.next_entry().await {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        let res = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = res {
            warn!(path = %path.display(), error = %e, "empty_entry_failed");
        }
    }
    info!(path = %q.path, "emptied");
    StatusCode::NO_CONTENT.into_response()
}
