//! HTTP read API
//!
//! Serves the current status list, a health check, and engine metrics in
//! Prometheus text format. Uses hyper for the HTTP server. The status route
//! reads through the result cache; a cache miss invokes the status builder
//! synchronously on the request path.

use crate::infra::metrics::Metrics;
use crate::services::cache::StatusCache;
use crate::services::status::{StatusBuilder, StatusError};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Shared dependencies of the request handlers.
pub struct ApiContext {
    pub cache: Arc<StatusCache>,
    pub builder: Arc<StatusBuilder>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format engine metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "occupancy_readings_total",
        "Raw readings accepted by the listener",
        MetricType::Counter,
        site,
        summary.readings_received,
    );
    write_metric(
        &mut output,
        "occupancy_readings_rejected_total",
        "Readings rejected as malformed or out of order",
        MetricType::Counter,
        site,
        summary.readings_rejected,
    );
    let _ = writeln!(output, "# HELP occupancy_readings_per_sec Readings ingested per second");
    let _ = writeln!(output, "# TYPE occupancy_readings_per_sec gauge");
    let _ = writeln!(
        output,
        "occupancy_readings_per_sec{{site=\"{site}\"}} {:.2}",
        summary.readings_per_sec
    );
    write_metric(
        &mut output,
        "occupancy_journal_write_errors_total",
        "Failed journal appends",
        MetricType::Counter,
        site,
        summary.journal_write_errors,
    );
    write_metric(
        &mut output,
        "occupancy_aggregation_runs_total",
        "Completed statistics aggregation runs",
        MetricType::Counter,
        site,
        summary.aggregation_runs,
    );
    write_metric(
        &mut output,
        "occupancy_aggregation_failures_total",
        "Failed statistics aggregation runs",
        MetricType::Counter,
        site,
        summary.aggregation_failures,
    );
    write_metric(
        &mut output,
        "occupancy_status_builds_total",
        "Status builder invocations (cache misses)",
        MetricType::Counter,
        site,
        summary.status_builds,
    );
    write_metric(
        &mut output,
        "occupancy_cache_hits_total",
        "Status reads served from the cache",
        MetricType::Counter,
        site,
        summary.cache_hits,
    );
    write_metric(
        &mut output,
        "occupancy_cache_misses_total",
        "Status reads that rebuilt the result",
        MetricType::Counter,
        site,
        summary.cache_misses,
    );

    output
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<ApiContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/current") => {
            let result = ctx.cache.get_or_build(|| {
                ctx.metrics.record_status_build();
                ctx.builder.build(chrono::Local::now())
            });

            match result {
                Ok(statuses) => match serde_json::to_string(&*statuses) {
                    Ok(body) => Ok(json_response(StatusCode::OK, body)),
                    Err(e) => {
                        error!(error = %e, "status_encode_failed");
                        Ok(json_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            r#"{"detail":"Internal error"}"#.to_string(),
                        ))
                    }
                },
                Err(StatusError::NoData) => Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"detail":"No data available"}"#.to_string(),
                )),
            }
        }
        // CORS preflight for the status route
        (&Method::OPTIONS, "/api/current") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail")),
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&ctx.metrics, &ctx.site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the HTTP API server
pub async fn start_api_server(
    port: u16,
    ctx: Arc<ApiContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %ctx.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_reading_received();
        metrics.record_reading_received();
        metrics.record_cache_hit();
        metrics.record_aggregation_run();

        let output = format_prometheus_metrics(&metrics, "hall-east");

        assert!(output.contains("occupancy_readings_total{site=\"hall-east\"} 2"));
        assert!(output.contains("occupancy_cache_hits_total{site=\"hall-east\"} 1"));
        assert!(output.contains("occupancy_aggregation_runs_total{site=\"hall-east\"} 1"));
        assert!(output.contains("# TYPE occupancy_readings_per_sec gauge"));
    }

    #[test]
    fn test_json_response_sets_cors_and_content_type() {
        let response = json_response(StatusCode::OK, "{}".to_string());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["Content-Type"], "application/json");
        assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
    }
}
