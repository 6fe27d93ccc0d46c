//! Outbound response frames for one request.
//!
//! A [`ResponseStream`] emits zero or more Continue frames followed by exactly
//! one terminal frame. `finish` consumes the stream, so nothing can be sent
//! after the terminal frame; a stream dropped unfinished (for example while
//! unwinding from a panic) sends a 500 from its `Drop`.
//!
//! Inside a batch the terminal frame keeps the `MORE` flag, since the batch's
//! own terminal frame follows it.

use crate::error::{ResourceError, SERVER_ERROR_BODY};
use bytes::Bytes;
use graphrep_protocol::{Encoder, ProtocolError, Response, Status, Value};
use tokio::sync::mpsc;

/// Channel carrying encoded frames from a worker back to the connection.
pub type FrameSender = mpsc::Sender<Bytes>;

/// Encodes a response into a complete transport frame.
pub fn encode_frame(response: &Response) -> Result<Bytes, ProtocolError> {
    Ok(Encoder::encode_response(response)?.freeze())
}

fn encode_terminal(response: &Response, batched: bool) -> Result<Bytes, ProtocolError> {
    if batched {
        Ok(Encoder::encode_batched_response(response)?.freeze())
    } else {
        encode_frame(response)
    }
}

pub struct ResponseStream {
    reply: FrameSender,
    continues: usize,
    terminal: Option<Status>,
    peer_gone: bool,
    batched: bool,
}

impl ResponseStream {
    pub fn new(reply: FrameSender) -> Self {
        Self::with_mode(reply, false)
    }

    /// Creates a stream for one request of a batch.
    pub fn batched(reply: FrameSender) -> Self {
        Self::with_mode(reply, true)
    }

    fn with_mode(reply: FrameSender, batched: bool) -> Self {
        Self {
            reply,
            continues: 0,
            terminal: None,
            peer_gone: false,
            batched,
        }
    }

    /// Sends a 100 Continue frame.
    ///
    /// Blocks while the connection's frame queue is full, which bounds the
    /// memory used by a streamed result.
    pub fn send_continue(&mut self, values: Vec<Value>) -> Result<(), ResourceError> {
        let frame = encode_frame(&Response::new(Status::Continue, values))?;
        if self.reply.blocking_send(frame).is_err() {
            self.peer_gone = true;
            return Err(ResourceError::Server("connection closed mid-stream".to_string()));
        }
        self.continues += 1;
        Ok(())
    }

    /// Sends the terminal frame and returns the status actually sent.
    pub fn finish(mut self, status: Status, values: Vec<Value>) -> Status {
        self.emit_terminal(status, values)
    }

    /// Ends the request with the frame for an error.
    pub fn fail(self, err: &ResourceError) -> Status {
        self.finish(err.status(), err.body())
    }

    /// Number of Continue frames sent so far.
    pub fn continues(&self) -> usize {
        self.continues
    }

    /// Returns whether the connection stopped accepting frames.
    pub fn is_peer_gone(&self) -> bool {
        self.peer_gone
    }

    fn emit_terminal(&mut self, status: Status, values: Vec<Value>) -> Status {
        let response = if status.is_terminal() {
            Response::new(status, values)
        } else {
            tracing::error!("refusing to end a response with status {}", status);
            server_error()
        };

        let (status, frame) = match encode_terminal(&response, self.batched) {
            Ok(frame) => (response.status, frame),
            Err(e) => {
                tracing::error!("failed to encode {} response: {}", response.status, e);
                let fallback = server_error();
                match encode_terminal(&fallback, self.batched) {
                    Ok(frame) => (fallback.status, frame),
                    Err(_) => {
                        self.terminal = Some(Status::ServerError);
                        return Status::ServerError;
                    }
                }
            }
        };

        self.terminal = Some(status);
        if !self.peer_gone && self.reply.blocking_send(frame).is_err() {
            self.peer_gone = true;
            tracing::debug!("connection closed before terminal {} frame", status);
        }
        status
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.terminal.is_none() {
            tracing::error!("response stream dropped without a terminal frame");
            let fallback = server_error();
            self.emit_terminal(fallback.status, fallback.data);
        }
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("continues", &self.continues)
            .field("terminal", &self.terminal)
            .field("peer_gone", &self.peer_gone)
            .field("batched", &self.batched)
            .finish()
    }
}

fn server_error() -> Response {
    Response::new(Status::ServerError, vec![Value::from(SERVER_ERROR_BODY)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_protocol::Decoder;

    fn channel() -> (ResponseStream, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(16);
        (ResponseStream::new(tx), rx)
    }

    fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<Response> {
        let mut decoder = Decoder::new();
        while let Ok(frame) = rx.try_recv() {
            decoder.extend_bytes(frame);
        }
        let mut responses = Vec::new();
        while let Some(response) = decoder.decode_response().unwrap() {
            responses.push(response);
        }
        responses
    }

    #[test]
    fn test_continue_then_terminal() {
        let (mut stream, rx) = channel();
        stream.send_continue(vec![Value::from("n")]).unwrap();
        stream.send_continue(vec![Value::from(1)]).unwrap();
        assert_eq!(stream.continues(), 2);
        assert_eq!(stream.finish(Status::Ok, vec![]), Status::Ok);

        let responses = drain(rx);
        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_continue());
        assert!(responses[1].is_continue());
        assert_eq!(responses[2], Response::empty(Status::Ok));
    }

    #[test]
    fn test_drop_without_finish_sends_server_error() {
        let (mut stream, rx) = channel();
        stream.send_continue(vec![Value::from("n")]).unwrap();
        drop(stream);

        let responses = drain(rx);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].status, Status::ServerError);
        assert_eq!(responses[1].data, vec![Value::from("server error")]);
    }

    #[test]
    fn test_fail_sends_error_body() {
        let (stream, rx) = channel();
        let status = stream.fail(&ResourceError::NotFound("Node 3 not found".into()));
        assert_eq!(status, Status::NotFound);

        let responses = drain(rx);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data, vec![Value::from("Node 3 not found")]);
    }

    #[test]
    fn test_continue_status_cannot_terminate() {
        let (stream, rx) = channel();
        assert_eq!(stream.finish(Status::Continue, vec![]), Status::ServerError);
        let responses = drain(rx);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, Status::ServerError);
    }

    #[test]
    fn test_unencodable_terminal_becomes_server_error() {
        let (stream, rx) = channel();
        let status = stream.finish(Status::Ok, vec![Value::Float(f64::NAN)]);
        assert_eq!(status, Status::ServerError);
        assert_eq!(drain(rx)[0].status, Status::ServerError);
    }

    #[test]
    fn test_batched_terminal_keeps_more() {
        let (tx, mut rx) = mpsc::channel(16);
        let stream = ResponseStream::batched(tx);
        assert_eq!(stream.finish(Status::Created, vec![]), Status::Created);

        let mut decoder = Decoder::new();
        decoder.extend_bytes(rx.try_recv().unwrap());
        let (response, more) = decoder.decode_batch_response().unwrap().unwrap();
        assert_eq!(response.status, Status::Created);
        assert!(more);
    }

    #[test]
    fn test_closed_connection() {
        let (mut stream, rx) = channel();
        drop(rx);
        assert!(stream.send_continue(vec![Value::Null]).is_err());
        assert!(stream.is_peer_gone());
        // finishing after the peer left must not panic
        assert_eq!(stream.finish(Status::Ok, vec![]), Status::Ok);
    }
}
