//! Crash-report receiver.
//!
//! A minimal endpoint standing in for the client's error-reporting backend.
//! Any POST body is persisted verbatim as `crash_report.json` in the
//! scenario's reporter directory; every request, POST included, gets the
//! same fixed JSON acknowledgment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::Method,
    response::IntoResponse,
    Json, Router,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{HarnessError, HarnessResult};

/// File name under which a posted report is persisted.
pub const CRASH_REPORT_FILE: &str = "crash_report.json";

async fn handle(
    State(dir): State<Arc<PathBuf>>,
    method: Method,
    body: Bytes,
) -> impl IntoResponse {
    if method == Method::POST {
        debug!(size = body.len(), "crash report received");
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir.as_ref())?;
            std::fs::write(dir.join(CRASH_REPORT_FILE), &body)
        };
        if let Err(e) = write() {
            warn!(error = %e, "failed to persist crash report");
        }
    }
    Json(json!({"version": "0"}))
}

/// Build the receiver router for a reporter directory.
pub fn create_router(dir: PathBuf) -> Router {
    Router::new().fallback(handle).with_state(Arc::new(dir))
}

/// Running crash-report receiver handle.
pub struct ReportReceiver {
    addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl ReportReceiver {
    /// Bind and start persisting reports into `dir`.
    pub async fn start(dir: PathBuf, port: u16) -> HarnessResult<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| HarnessError::ServerStartFailed(format!("reporter bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| HarnessError::ServerStartFailed(format!("reporter addr: {e}")))?;

        let router = create_router(dir);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!(error = %e, "report receiver stopped with error");
            }
        });

        info!(%addr, "crash-report receiver listening");
        Ok(Self {
            addr,
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the receiver. Safe to call twice.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(addr = %self.addr, "crash-report receiver stopped");
        }
    }
}

impl Drop for ReportReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}
