//! Diagnostics HTTP listener.
//!
//! Serves `GET /health` (JSON), `GET /` (HTML status page) and CORS preflight
//! replies. It only ever reads [`Telemetry`] snapshots, so it can neither block
//! nor be blocked by the poll loop.

use crate::runtime::telemetry::{resident_memory_bytes, Telemetry, TelemetrySnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub memory: Option<MemoryUsage>,
    pub stats: TelemetrySnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub resident_bytes: u64,
}

impl HealthReport {
    pub fn collect(telemetry: &Telemetry) -> Self {
        let stats = telemetry.snapshot();
        let status = if stats.consecutive_errors > 0 {
            "degraded"
        } else {
            "ok"
        };
        Self {
            status,
            uptime_seconds: telemetry.uptime().as_secs(),
            memory: resident_memory_bytes().map(|resident_bytes| MemoryUsage { resident_bytes }),
            stats,
            timestamp: Utc::now(),
        }
    }
}

pub struct HealthServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl HealthServer {
    /// Binds `addr` and serves in a background task until [`Self::shutdown`].
    pub async fn start(addr: SocketAddr, telemetry: Arc<Telemetry>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind health listener on {addr}"))?;
        let addr = listener
            .local_addr()
            .context("failed to read health listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert health listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set health listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let telemetry = telemetry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(telemetry.clone(), req)
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build health HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            graceful.await.context("health server stopped unexpectedly")
        });

        tracing::info!(%addr, "health endpoint listening");

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Takes the serving task so the caller can watch it for crashes. After
    /// this, [`Self::shutdown`] only signals the listener to stop.
    pub fn take_handle(&mut self) -> Option<JoinHandle<Result<()>>> {
        self.handle.take()
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.context("health server task panicked")?,
            None => Ok(()),
        }
    }
}

async fn serve_request(
    telemetry: Arc<Telemetry>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    Ok(route(&telemetry, req.method(), req.uri().path()))
}

pub(crate) fn route(telemetry: &Telemetry, method: &Method, path: &str) -> Response<Body> {
    if method == Method::OPTIONS {
        return preflight();
    }

    match (method, path) {
        (&Method::GET, "/health") => health_json(telemetry),
        (&Method::GET, "/") => status_page(telemetry),
        _ => not_found(),
    }
}

fn health_json(telemetry: &Telemetry) -> Response<Body> {
    let report = HealthReport::collect(telemetry);
    match serde_json::to_vec(&report) {
        Ok(body) => respond(StatusCode::OK, "application/json", Body::from(body)),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode health report");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain; charset=utf-8",
                Body::from("Internal Server Error"),
            )
        }
    }
}

fn status_page(telemetry: &Telemetry) -> Response<Body> {
    let report = HealthReport::collect(telemetry);
    let stats = &report.stats;
    let last_job = stats
        .last_job_time
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let memory = report
        .memory
        .map(|usage| format!("{:.1} MiB", usage.resident_bytes as f64 / (1024.0 * 1024.0)))
        .unwrap_or_else(|| "unavailable".to_string());

    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Resume importer</title></head>\n<body>\n\
         <h1>Resume importer: {status}</h1>\n<ul>\n\
         <li>Uptime: {uptime}s</li>\n\
         <li>Memory: {memory}</li>\n\
         <li>Total processed: {total}</li>\n\
         <li>Successful: {successful}</li>\n\
         <li>Failed: {failed}</li>\n\
         <li>Empty polls: {empty}</li>\n\
         <li>Consecutive errors: {consecutive} (max {max_consecutive})</li>\n\
         <li>Average latency: {latency:.1} ms</li>\n\
         <li>Last job: {last_job}</li>\n\
         </ul>\n<p><a href=\"/health\">JSON</a></p>\n</body>\n</html>\n",
        status = report.status,
        uptime = report.uptime_seconds,
        total = stats.total_jobs_processed,
        successful = stats.successful_jobs,
        failed = stats.failed_jobs,
        empty = stats.empty_polls,
        consecutive = stats.consecutive_errors,
        max_consecutive = stats.max_consecutive_errors,
        latency = stats.average_latency_ms,
    );
    respond(StatusCode::OK, "text/html; charset=utf-8", Body::from(html))
}

fn preflight() -> Response<Body> {
    let mut response = respond(StatusCode::OK, "text/plain; charset=utf-8", Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn not_found() -> Response<Body> {
    respond(
        StatusCode::NOT_FOUND,
        "text/plain; charset=utf-8",
        Body::from("Not Found"),
    )
}

fn respond(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
