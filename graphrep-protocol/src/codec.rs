//! Encoder and decoder for graphrep frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Request, Response};
use bytes::{Bytes, BytesMut};

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame.
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        Frame::new(request.encode()?).encode()
    }

    /// Encodes a response into a frame. Continue frames carry the `MORE` flag.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Self::response_frame(response)?.encode()
    }

    /// Encodes a batch: every request flagged `MORE`, then an empty frame
    /// closing the batch.
    pub fn encode_batch(requests: &[Request]) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for request in requests {
            buf.extend_from_slice(&Frame::new(request.encode()?).with_more().encode()?);
        }
        buf.extend_from_slice(&Frame::new(Bytes::new()).encode()?);
        Ok(buf)
    }

    /// Encodes a request's terminal frame inside a batch reply. It carries
    /// `MORE` because the batch's own terminal frame follows.
    pub fn encode_batched_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Frame::new(response.encode()?).with_more().encode()
    }

    /// Builds the transport frame for a response without serializing it.
    pub fn response_frame(response: &Response) -> Result<Frame, ProtocolError> {
        let frame = Frame::new(response.encode()?);
        Ok(if response.is_continue() {
            frame.with_more()
        } else {
            frame
        })
    }
}

/// Decodes frames into requests and responses.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Request::parse(&frame.payload).map(Some),
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response from the buffer.
    ///
    /// A frame whose `MORE` flag disagrees with its status class is rejected,
    /// since the exchange boundary would otherwise be ambiguous.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let response = Response::parse(&frame.payload)?;
                if frame.has_more() != response.is_continue() {
                    return Err(ProtocolError::MalformedResponse(format!(
                        "status {} with more flag {}",
                        response.status.code(),
                        frame.has_more()
                    )));
                }
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Attempts to decode the next frame of a batch reply, together with its
    /// `MORE` flag. Request terminal frames inside a batch carry the flag;
    /// only the batch's own terminal frame does not.
    pub fn decode_batch_response(&mut self) -> Result<Option<(Response, bool)>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let response = Response::parse(&frame.payload)?;
                if response.is_continue() && !frame.has_more() {
                    return Err(ProtocolError::MalformedResponse(
                        "continue frame closes the reply".to_string(),
                    ));
                }
                Ok(Some((response, frame.has_more())))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
