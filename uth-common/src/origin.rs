//! Backing static file server for the served fixture tree.
//!
//! Serves `server/<version>/...` and the manifest artifact over loopback
//! HTTP. The fault-injection proxy is the only intended consumer; it relays
//! origin responses verbatim unless a fault fires first.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{HarnessError, HarnessResult};

/// Decode `%XX` escapes and `+` in a request path.
pub fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi * 16 + lo) as u8);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Content type by file extension; the client downloads raw payloads, so
/// anything unrecognized is served as an octet stream.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("sha256") => "text/plain",
        Some("gz") => "application/gzip",
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Resolve a request path against the served root, rejecting traversal.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path);
    let relative = decoded.trim_start_matches('/');
    let candidate = Path::new(relative);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }
    let full = root.join(candidate);
    full.is_file().then_some(full)
}

async fn serve_file(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    match resolve(&root, uri.path()) {
        Some(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), size = bytes.len(), "origin served file");
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, content_type_for(&path))],
                    Body::from(bytes),
                )
                    .into_response()
            }
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read {}: {e}", path.display()),
            )
                .into_response(),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not found", "path": uri.path()})),
        )
            .into_response(),
    }
}

/// Build the origin router for a served root directory.
pub fn create_router(root: PathBuf) -> Router {
    Router::new()
        .fallback(serve_file)
        .with_state(Arc::new(root))
}

/// Running origin server handle.
pub struct StaticServer {
    addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl StaticServer {
    /// Bind the listener and start serving `root`. Port 0 binds ephemerally.
    pub async fn start(root: PathBuf, port: u16) -> HarnessResult<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| HarnessError::ServerStartFailed(format!("origin bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| HarnessError::ServerStartFailed(format!("origin addr: {e}")))?;

        let router = create_router(root);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::warn!(error = %e, "origin server stopped with error");
            }
        });

        info!(%addr, "origin static server listening");
        Ok(Self {
            addr,
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and release the listening socket. Safe to call twice.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(addr = %self.addr, "origin static server stopped");
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.stop();
    }
}
