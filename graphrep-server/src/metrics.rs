//! Prometheus metrics for the graphrep server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use graphrep_protocol::Status;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus metrics for the graphrep server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Total requests by resource and method.
    pub requests_total: CounterVec,
    /// Terminal responses by status code.
    pub responses_total: CounterVec,
    /// Continue frames sent by resource.
    pub continue_frames_total: CounterVec,
    /// Request duration histogram by resource.
    pub request_duration: HistogramVec,
    /// Exchanges waiting for a worker.
    pub queue_depth: Gauge,
    /// Number of worker threads.
    pub workers: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "graphrep_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "graphrep_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Requests
        let requests_total = CounterVec::new(
            Opts::new("graphrep_requests_total", "Total requests by resource and method"),
            &["resource", "method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let responses_total = CounterVec::new(
            Opts::new("graphrep_responses_total", "Terminal responses by status code"),
            &["status"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let continue_frames_total = CounterVec::new(
            Opts::new(
                "graphrep_continue_frames_total",
                "Continue frames streamed by resource",
            ),
            &["resource"],
        )?;
        registry.register(Box::new(continue_frames_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "graphrep_request_duration_seconds",
                "Request duration in seconds by resource",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["resource"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        // Workers
        let queue_depth = Gauge::with_opts(Opts::new(
            "graphrep_queue_depth",
            "Exchanges waiting for a worker",
        ))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let workers = Gauge::with_opts(Opts::new(
            "graphrep_workers",
            "Number of worker threads",
        ))?;
        registry.register(Box::new(workers.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            responses_total,
            continue_frames_total,
            request_duration,
            queue_depth,
            workers,
        })
    }

    /// Records one finished request.
    pub fn observe_request(
        &self,
        resource: &str,
        method: &str,
        status: Status,
        continues: usize,
        elapsed: Duration,
    ) {
        self.requests_total
            .with_label_values(&[resource, method])
            .inc();
        self.responses_total
            .with_label_values(&[&status.code().to_string()])
            .inc();
        if continues > 0 {
            self.continue_frames_total
                .with_label_values(&[resource])
                .inc_by(continues as f64);
        }
        self.request_duration
            .with_label_values(&[resource])
            .observe(elapsed.as_secs_f64());
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => text(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        "/health" | "/healthz" => text(StatusCode::OK, "text/plain", b"OK".to_vec()),
        _ => text(StatusCode::NOT_FOUND, "text/plain", b"Not Found".to_vec()),
    }
}

fn text(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
