//! Prometheus metrics HTTP endpoint
//!
//! Exposes ingest metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::domain::rejection::Rejection;
use crate::domain::types::Table;
use crate::infra::metrics::{Metrics, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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

/// Write a counter metric with a single label
fn write_counter(output: &mut String, name: &str, help: &str, topic: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{topic=\"{topic}\"}} {val}");
}

/// Write a counter family split by one extra label
fn write_labelled_counter<'a>(
    output: &mut String,
    name: &str,
    help: &str,
    topic: &str,
    label: &str,
    values: impl Iterator<Item = (&'a str, u64)>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{topic=\"{topic}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    topic: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{topic=\"{topic}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{topic=\"{topic}\",le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum{{topic=\"{topic}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{topic=\"{topic}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
///
/// Reads counters without resetting them, so scraping does not disturb the
/// periodic log summary.
fn format_prometheus_metrics(metrics: &Metrics, topic: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_counter(
        &mut output,
        "ingest_messages_received_total",
        "Payloads received from the broker",
        topic,
        metrics.received_total(),
    );
    write_counter(
        &mut output,
        "ingest_messages_accepted_total",
        "Messages that passed validation",
        topic,
        metrics.accepted_total(),
    );

    let rejections = metrics.rejections();
    write_labelled_counter(
        &mut output,
        "ingest_rejections_total",
        "Messages dropped by validation, by reason",
        topic,
        "reason",
        Rejection::LABELS.iter().zip(rejections).map(|(label, n)| (*label, n)),
    );

    write_labelled_counter(
        &mut output,
        "ingest_rows_inserted_total",
        "Rows committed, by table",
        topic,
        "table",
        Table::ALL.iter().map(|t| (t.as_str(), metrics.rows_in(*t))),
    );

    write_counter(
        &mut output,
        "ingest_persistence_failures_total",
        "Records lost to a failed insert or commit",
        topic,
        metrics.persistence_failures(),
    );
    write_counter(
        &mut output,
        "ingest_broker_errors_total",
        "Errors reported by the message source",
        topic,
        metrics.broker_errors(),
    );
    write_counter(
        &mut output,
        "ingest_poll_timeouts_total",
        "Polls that returned no message",
        topic,
        metrics.poll_timeouts(),
    );

    write_histogram(
        &mut output,
        "ingest_dispatch_latency_us",
        "Time to write one record to storage in microseconds",
        topic,
        &metrics.dispatch_latency_buckets(),
        metrics.dispatch_latency_total_us(),
    );

    output
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    topic: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &topic);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    topic: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let topic = Arc::new(topic);

    info!(port = %port, topic = %topic, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let topic = topic.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let topic = topic.clone();
                                async move { handle_request(req, metrics, topic).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
