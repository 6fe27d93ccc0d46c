//! TCP front-end.
//!
//! One tokio task per connection reads request frames, hands each one to the
//! worker pool as an [`Exchange`] and writes the worker's frames back in the
//! order they were produced. A connection carries one exchange at a time: the
//! next request frame is not submitted until the previous exchange has
//! delivered its terminal frame.
//!
//! Request frames flagged `MORE` are collected into a batch, which is
//! submitted as one exchange once a frame without the flag closes it. A frame
//! that cannot be decoded is answered with a 400 and the connection closed.

use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::response::encode_frame;
use crate::session::Session;
use crate::worker::{Exchange, ExchangeQueue, Payload};
use bytes::Bytes;
use graphrep_protocol::{Decoder, Response, Status, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Most requests one batch may carry.
pub const MAX_BATCH_REQUESTS: usize = 1024;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames buffered between a worker and its connection.
    pub frame_queue: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("frame_queue", &self.frame_queue)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let network = crate::config::NetworkConfig::default();
        Self {
            bind_addr: network.bind_addr,
            idle_timeout: network.idle_timeout(),
            max_connections: network.max_connections,
            frame_queue: crate::config::WorkersConfig::default().frame_queue,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the server configuration from the loaded file/env config.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            frame_queue: config.workers.frame_queue.max(1),
            metrics: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for graphrep.
pub struct Server {
    config: ServerConfig,
    queue: ExchangeQueue,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a server feeding the given worker pool queue.
    pub fn new(config: ServerConfig, queue: ExchangeQueue) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            queue,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let queue = self.queue.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    queue,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        queue: ExchangeQueue,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut session = Session::new(addr);
        tracing::info!("Client connected: {} (session {})", addr, session.short_id());

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];
        let mut batch = PendingBatch::default();

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            session.touch();
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    if session.idle_duration() > config.idle_timeout {
                        tracing::debug!("[{}] Idle timeout", addr);
                        return Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            // Frames the client pipelined are answered one exchange at a time.
            loop {
                let frame = match decoder.decode_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("[{}] Undecodable frame: {}", addr, e);
                        let response =
                            Response::new(Status::BadRequest, vec![Value::from(e.to_string())]);
                        stream.write_all(&encode_frame(&response)?).await?;
                        return Err(e.into());
                    }
                };

                if frame.has_more() {
                    batch.push(frame.payload);
                    continue;
                }

                session.begin_exchange();
                let payload = if batch.is_open() {
                    if !frame.payload.is_empty() {
                        batch.push(frame.payload);
                    }
                    match batch.close() {
                        Ok(parts) => Payload::Batch(parts),
                        Err(total) => {
                            tracing::debug!("[{}] Rejecting batch of {} requests", addr, total);
                            let response = Response::new(
                                Status::BadRequest,
                                vec![Value::from(format!(
                                    "batch exceeds {} requests",
                                    MAX_BATCH_REQUESTS
                                ))],
                            );
                            stream.write_all(&encode_frame(&response)?).await?;
                            session.end_exchange();
                            continue;
                        }
                    }
                } else {
                    Payload::Single(frame.payload)
                };
                let requests = match &payload {
                    Payload::Single(_) => 1,
                    Payload::Batch(parts) => parts.len() as u64,
                };
                stats.requests_total.fetch_add(requests, Ordering::Relaxed);
                Self::exchange(&mut stream, &session, payload, &queue, config).await?;
                session.end_exchange();
            }
        }
    }

    /// Submits one request or batch and relays frames until the worker is
    /// done with it.
    async fn exchange(
        stream: &mut TcpStream,
        session: &Session,
        payload: Payload,
        queue: &ExchangeQueue,
        config: &ServerConfig,
    ) -> Result<(), ServerError> {
        let addr = session.remote_addr;

        let (reply, mut frames) = mpsc::channel(config.frame_queue.max(1));
        queue.submit(Exchange { payload, reply })?;
        if let Some(ref metrics) = config.metrics {
            metrics.queue_depth.set(queue.len() as f64);
        }

        // The worker drops its sender right after the terminal frame.
        let mut written = 0usize;
        while let Some(bytes) = frames.recv().await {
            stream.write_all(&bytes).await?;
            written += 1;
        }
        tracing::trace!("[{}] Exchange {} wrote {} frames", addr, session.request_count(), written);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Request frames of a batch whose closing frame has not arrived yet.
#[derive(Debug, Default)]
struct PendingBatch {
    parts: Option<Vec<Bytes>>,
    dropped: usize,
}

impl PendingBatch {
    fn is_open(&self) -> bool {
        self.parts.is_some()
    }

    /// Adds a request; past [`MAX_BATCH_REQUESTS`] it is counted and dropped.
    fn push(&mut self, part: Bytes) {
        let parts = self.parts.get_or_insert_with(Vec::new);
        if parts.len() < MAX_BATCH_REQUESTS {
            parts.push(part);
        } else {
            self.dropped += 1;
        }
    }

    /// Ends the batch, or returns its total size when it overflowed.
    fn close(&mut self) -> Result<Vec<Bytes>, usize> {
        let parts = self.parts.take().unwrap_or_default();
        match std::mem::take(&mut self.dropped) {
            0 => Ok(parts),
            dropped => Err(parts.len() + dropped),
        }
    }
}
