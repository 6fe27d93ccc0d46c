//! Connection management.

use crate::error::ClientError;
use graphrep_protocol::{Decoder, Encoder, Request, Response, Status, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for one whole exchange, up to the terminal frame.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// Every frame of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Continue frames in arrival order.
    pub continues: Vec<Response>,
    /// Terminal status.
    pub status: Status,
    /// Values carried by the terminal frame.
    pub body: Vec<Value>,
}

impl Reply {
    /// Turns a 4xx/5xx reply into a [`ClientError::Status`].
    pub fn into_result(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClientError::from_terminal(self.status, &self.body))
        }
    }

    /// Returns the value lists of the Continue frames.
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.continues.iter().map(|frame| frame.data.as_slice())
    }
}

/// Every frame of one batch exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReply {
    /// One reply per request that ran, in request order. A failed batch
    /// stops at the failing request.
    pub replies: Vec<Reply>,
    /// Status of the batch: 200 once committed, otherwise the failing
    /// request's status.
    pub status: Status,
    pub body: Vec<Value>,
}

impl BatchReply {
    /// Turns a rolled-back batch into a [`ClientError::Status`].
    pub fn into_result(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClientError::from_terminal(self.status, &self.body))
        }
    }
}

struct Io {
    stream: TcpStream,
    decoder: Decoder,
}

/// A connection to a graphrep server.
///
/// Exchanges are strictly sequential; concurrent callers queue on the
/// connection's lock.
pub struct Connection {
    config: ConnectionConfig,
    io: Mutex<Option<Io>>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            io: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();
        *self.io.lock().await = Some(Io {
            stream,
            decoder: Decoder::new(),
        });
        tracing::debug!("Connected to {}", self.config.addr);
        Ok(())
    }

    /// Sends a request and collects frames up to the terminal one.
    ///
    /// A timeout or I/O failure mid-exchange leaves the stream at an unknown
    /// frame boundary, so the connection is dropped.
    pub async fn request(&self, request: &Request) -> Result<Reply, ClientError> {
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let encoded = Encoder::encode_request(request)?;
        tracing::debug!(
            "Sending {} {} ({} bytes)",
            request.method,
            request.resource,
            encoded.len()
        );

        let result = tokio::time::timeout(
            self.config.request_timeout,
            Self::exchange(io, &encoded, self.config.read_buffer_size),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        if result.is_err() {
            tracing::debug!("Exchange failed, dropping connection");
            *guard = None;
        }
        result
    }

    /// Sends requests as one batch, run by the server in a single
    /// transaction. Later requests may refer to the entity an earlier one
    /// touched with [`Value::Pointer`].
    pub async fn batch(&self, requests: &[Request]) -> Result<BatchReply, ClientError> {
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let encoded = Encoder::encode_batch(requests)?;
        tracing::debug!("Sending batch of {} requests ({} bytes)", requests.len(), encoded.len());

        let result = tokio::time::timeout(
            self.config.request_timeout,
            Self::batch_exchange(io, &encoded, self.config.read_buffer_size),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        if result.is_err() {
            tracing::debug!("Batch exchange failed, dropping connection");
            *guard = None;
        }
        result
    }

    async fn batch_exchange(
        io: &mut Io,
        encoded: &[u8],
        buffer_size: usize,
    ) -> Result<BatchReply, ClientError> {
        io.stream.write_all(encoded).await?;

        let mut replies = Vec::new();
        let mut continues = Vec::new();
        let mut buf = vec![0u8; buffer_size];
        loop {
            while let Some((response, more)) = io.decoder.decode_batch_response()? {
                if response.is_continue() {
                    continues.push(response);
                } else if more {
                    replies.push(Reply {
                        continues: std::mem::take(&mut continues),
                        status: response.status,
                        body: response.data,
                    });
                } else {
                    tracing::debug!(
                        "Batch ended with {} after {} replies",
                        response.status,
                        replies.len()
                    );
                    return Ok(BatchReply {
                        replies,
                        status: response.status,
                        body: response.data,
                    });
                }
            }

            let n = io.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            io.decoder.extend(&buf[..n]);
        }
    }

    async fn exchange(io: &mut Io, encoded: &[u8], buffer_size: usize) -> Result<Reply, ClientError> {
        io.stream.write_all(encoded).await?;

        let mut continues = Vec::new();
        let mut buf = vec![0u8; buffer_size];
        loop {
            while let Some(response) = io.decoder.decode_response()? {
                if response.is_continue() {
                    continues.push(response);
                    continue;
                }
                tracing::debug!(
                    "Received {} after {} continue frames",
                    response.status,
                    continues.len()
                );
                return Ok(Reply {
                    continues,
                    status: response.status,
                    body: response.data,
                });
            }

            let n = io.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            io.decoder.extend(&buf[..n]);
        }
    }

    /// Returns whether the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.io.lock().await.is_some()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        if let Some(mut io) = self.io.lock().await.take() {
            tracing::debug!("Shutting down connection");
            let _ = io.stream.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_protocol::Method;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:47474".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config =
            ConnectionConfig::new("127.0.0.1:47474".parse().unwrap()).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1:47474".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_request_without_connect() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1:47474".parse().unwrap()));
        let err = conn
            .request(&Request::new(Method::Get, "node").with_arg(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    /// Collects continue frames split across several writes.
    #[tokio::test]
    async fn test_collects_frames_until_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 1024];
            let request = loop {
                let n = socket.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
                if let Some(request) = decoder.decode_request().unwrap() {
                    break request;
                }
            };
            assert_eq!(request.resource, "cypher");

            let frames = [
                Response::new(Status::Continue, vec![Value::from("x")]),
                Response::new(Status::Continue, vec![Value::from(1)]),
                Response::empty(Status::Ok),
            ];
            for frame in &frames {
                let bytes = Encoder::encode_response(frame).unwrap();
                let (head, tail) = bytes.split_at(bytes.len() / 2);
                socket.write_all(head).await.unwrap();
                socket.flush().await.unwrap();
                socket.write_all(tail).await.unwrap();
            }
        });

        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();
        let reply = conn
            .request(&Request::new(Method::Post, "cypher").with_arg("RETURN 1 AS x"))
            .await
            .unwrap();

        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.continues.len(), 2);
        let rows: Vec<_> = reply.rows().collect();
        assert_eq!(rows[1], &[Value::from(1)][..]);
    }

    #[tokio::test]
    async fn test_batch_groups_frames_per_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 1024];
            let mut parts = 0;
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
                let mut closed = false;
                while let Some(frame) = decoder.decode_frame().unwrap() {
                    if frame.has_more() {
                        parts += 1;
                    } else {
                        closed = true;
                    }
                }
                if closed {
                    break;
                }
            }
            assert_eq!(parts, 2);

            let mut bytes = Encoder::encode_batched_response(&Response::new(
                Status::Created,
                vec![Value::from(1)],
            ))
            .unwrap();
            bytes.extend_from_slice(
                &Encoder::encode_response(&Response::new(Status::Continue, vec![Value::from("x")]))
                    .unwrap(),
            );
            bytes.extend_from_slice(
                &Encoder::encode_batched_response(&Response::empty(Status::Ok)).unwrap(),
            );
            bytes.extend_from_slice(&Encoder::encode_response(&Response::empty(Status::Ok)).unwrap());
            socket.write_all(&bytes).await.unwrap();
        });

        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();
        let reply = conn
            .batch(&[
                Request::new(Method::Post, "node"),
                Request::new(Method::Post, "cypher").with_arg(Value::Pointer(0)),
            ])
            .await
            .unwrap();

        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.replies.len(), 2);
        assert_eq!(reply.replies[0].status, Status::Created);
        assert!(reply.replies[0].continues.is_empty());
        assert_eq!(reply.replies[1].continues.len(), 1);
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_closed_mid_exchange_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let bytes = Encoder::encode_response(&Response::new(Status::Continue, vec![])).unwrap();
            socket.write_all(&bytes).await.unwrap();
        });

        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();
        let err = conn
            .request(&Request::new(Method::Get, "nodeset").with_arg("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert!(!conn.is_connected().await);
    }
}
