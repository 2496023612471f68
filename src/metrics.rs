//! Prometheus metrics (RED: Rate, Errors, Duration) for the LDAP listener and
//! the LDIF import.

use crate::import::ImportSummary;
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Upper bounds of the duration histogram buckets, in seconds. +Inf is the count.
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Per-operation histogram. Buckets are stored non-cumulative.
#[derive(Debug, Default)]
struct DurationHistogram {
    buckets: [AtomicU64; 11],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl DurationHistogram {
    fn observe(&self, duration: Duration) {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        let secs = duration.as_secs_f64();
        if let Some(i) = DURATION_BUCKETS.iter().position(|&le| secs <= le) {
            self.buckets[i].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct OperationStats {
    requests: AtomicU64,
    errors: AtomicU64,
    duration: DurationHistogram,
}

/// Server counters (thread-safe, lock-free on the hot path).
#[derive(Debug, Default)]
pub struct Metrics {
    /// Client connections accepted.
    pub connections_total: AtomicU64,
    /// LDAP messages that could not be decoded.
    pub decode_errors: AtomicU64,
    /// Connections closed with a notice of disconnection.
    pub disconnects: AtomicU64,
    pub ldif_entries_read: AtomicU64,
    pub ldif_entries_imported: AtomicU64,
    pub ldif_entries_rejected: AtomicU64,
    pub ldif_entries_skipped: AtomicU64,
    /// Keyed by operation name ("bind", "search", ...).
    operations: DashMap<String, OperationStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_connections(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn with_operation(&self, op: &str, f: impl FnOnce(&OperationStats)) {
        if let Some(stats) = self.operations.get(op) {
            f(&stats);
            return;
        }
        let stats = self.operations.entry(op.to_string()).or_default();
        f(&stats);
    }

    /// Count one processed request and how long it took.
    pub fn observe_request(&self, op: &str, duration: Duration, failed: bool) {
        self.with_operation(op, |stats| {
            stats.requests.fetch_add(1, Ordering::Relaxed);
            if failed {
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
            stats.duration.observe(duration);
        });
    }

    pub fn requests(&self, op: &str) -> u64 {
        self.operations
            .get(op)
            .map_or(0, |s| s.requests.load(Ordering::Relaxed))
    }

    pub fn errors(&self, op: &str) -> u64 {
        self.operations
            .get(op)
            .map_or(0, |s| s.errors.load(Ordering::Relaxed))
    }

    pub fn record_import(&self, summary: &ImportSummary) {
        self.ldif_entries_read.fetch_add(summary.entries_read, Ordering::Relaxed);
        self.ldif_entries_imported
            .fetch_add(summary.entries_imported, Ordering::Relaxed);
        self.ldif_entries_rejected
            .fetch_add(summary.entries_rejected, Ordering::Relaxed);
        self.ldif_entries_skipped
            .fetch_add(summary.entries_ignored, Ordering::Relaxed);
    }

    /// Prometheus text exposition format.
    pub fn render(&self, backend_entries: usize) -> String {
        let mut out = String::new();
        for (name, help, value) in [
            (
                "ldif_directory_connections_total",
                "Total number of client connections accepted.",
                &self.connections_total,
            ),
            (
                "ldif_directory_decode_errors_total",
                "Total number of LDAP messages that could not be decoded.",
                &self.decode_errors,
            ),
            (
                "ldif_directory_disconnects_total",
                "Total number of connections closed with a notice of disconnection.",
                &self.disconnects,
            ),
        ] {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, value.load(Ordering::Relaxed)));
        }

        out.push_str("# HELP ldif_directory_ldif_entries_total LDIF entries processed by outcome.\n");
        out.push_str("# TYPE ldif_directory_ldif_entries_total counter\n");
        for (outcome, value) in [
            ("read", &self.ldif_entries_read),
            ("imported", &self.ldif_entries_imported),
            ("rejected", &self.ldif_entries_rejected),
            ("skipped", &self.ldif_entries_skipped),
        ] {
            out.push_str(&format!(
                "ldif_directory_ldif_entries_total{{outcome=\"{}\"}} {}\n",
                outcome,
                value.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP ldif_directory_entries Number of entries held by the backend.\n");
        out.push_str("# TYPE ldif_directory_entries gauge\n");
        out.push_str(&format!("ldif_directory_entries {}\n", backend_entries));

        let mut ops: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        ops.sort();

        out.push_str("# HELP ldif_directory_requests_total Total LDAP requests by operation.\n");
        out.push_str("# TYPE ldif_directory_requests_total counter\n");
        for op in &ops {
            out.push_str(&format!(
                "ldif_directory_requests_total{{op=\"{}\"}} {}\n",
                op,
                self.requests(op)
            ));
        }

        out.push_str("# HELP ldif_directory_errors_total Total LDAP requests that did not succeed, by operation.\n");
        out.push_str("# TYPE ldif_directory_errors_total counter\n");
        for op in &ops {
            out.push_str(&format!(
                "ldif_directory_errors_total{{op=\"{}\"}} {}\n",
                op,
                self.errors(op)
            ));
        }

        out.push_str("# HELP ldif_directory_request_duration_seconds Request duration in seconds by operation.\n");
        out.push_str("# TYPE ldif_directory_request_duration_seconds histogram\n");
        for op in &ops {
            let Some(stats) = self.operations.get(op) else {
                continue;
            };
            let hist = &stats.duration;
            let count = hist.count.load(Ordering::Relaxed);
            let mut cum = 0u64;
            for (i, &le) in DURATION_BUCKETS.iter().enumerate() {
                cum += hist.buckets[i].load(Ordering::Relaxed);
                out.push_str(&format!(
                    "ldif_directory_request_duration_seconds_bucket{{op=\"{}\",le=\"{}\"}} {}\n",
                    op, le, cum
                ));
            }
            out.push_str(&format!(
                "ldif_directory_request_duration_seconds_bucket{{op=\"{}\",le=\"+Inf\"}} {}\n",
                op, count
            ));
            let sum_secs = hist.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            out.push_str(&format!(
                "ldif_directory_request_duration_seconds_sum{{op=\"{}\"}} {}\n",
                op, sum_secs
            ));
            out.push_str(&format!(
                "ldif_directory_request_duration_seconds_count{{op=\"{}\"}} {}\n",
                op, count
            ));
        }
        out
    }
}

/// Backend state reported by GET /ready and GET /metrics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackendStatus {
    /// Startup import finished.
    pub ready: bool,
    pub entries: usize,
}

pub type StatusFn = Arc<dyn Fn() -> BackendStatus + Send + Sync>;

/// Path from the HTTP request line ("GET /health HTTP/1.1" -> "/health").
fn request_path(first_line: &str) -> &str {
    let line = first_line.trim();
    let mut parts = line.split_ascii_whitespace();
    let _method = parts.next();
    let path = parts.next().unwrap_or("");
    if path.starts_with('/') {
        path
    } else {
        ""
    }
}

/// Serve GET /metrics, GET /health and GET /ready on `addr`.
/// - /health (liveness): 200 while the process runs.
/// - /ready (readiness): 200 once the startup import finished, 503 before.
pub async fn run_metrics_server(addr: &str, metrics: Arc<Metrics>, status: StatusFn) -> Result<()> {
    let socket_addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics listen address: {}", addr))?;

    let listener = TcpListener::bind(&socket_addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", socket_addr))?;

    info!("Metrics server listening on http://{} (GET /metrics, /health, /ready)", socket_addr);
    serve_metrics(listener, metrics, status).await
}

pub async fn serve_metrics(listener: TcpListener, metrics: Arc<Metrics>, status: StatusFn) -> Result<()> {
    loop {
        let (mut stream, _peer) = match listener.accept().await {
            Ok(accept) => accept,
            Err(e) => {
                error!("Metrics accept error: {}", e);
                continue;
            }
        };

        let metrics = Arc::clone(&metrics);
        let status = Arc::clone(&status);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let mut total = 0usize;
            loop {
                match stream.read(&mut buf[total..]).await {
                    Ok(0) => break,
                    Ok(n) => {
                        total += n;
                        if total >= 4 && buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                        if total >= buf.len() {
                            break;
                        }
                    }
                    Err(_) => return,
                }
            }

            let request = String::from_utf8_lossy(&buf[..total]);
            let path = request.lines().next().map(request_path).unwrap_or("");

            let (status_line, body, content_type) = match path {
                "/health" => ("200 OK", "ok".to_string(), "text/plain; charset=utf-8"),
                "/ready" => {
                    let current = status();
                    let body_json = serde_json::to_string(&current)
                        .unwrap_or_else(|_| r#"{"ready":false,"error":"serialize"}"#.to_string());
                    let status_line = if current.ready { "200 OK" } else { "503 Service Unavailable" };
                    (status_line, body_json, "application/json")
                }
                "/metrics" => {
                    let current = status();
                    ("200 OK", metrics.render(current.entries), "text/plain; charset=utf-8")
                }
                _ => (
                    "404 Not Found",
                    "Not found. Supported: GET /metrics, GET /health, GET /ready.\n".to_string(),
                    "text/plain; charset=utf-8",
                ),
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );

            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}
