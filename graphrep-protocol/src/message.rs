//! Request lines and response frames.
//!
//! ```text
//! request:  <METHOD> \t <resource> [\t <argument>]*
//! response: <status> [\t <value>]*
//! ```

use crate::error::ProtocolError;
use crate::value::Value;
use crate::FIELD_DELIMITER;
use std::fmt;

/// Request verb.
///
/// Tokens outside the five known verbs are kept verbatim so that dispatch can
/// answer "method not allowed" and echo them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Patch,
    Post,
    Delete,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Continue,
    Ok,
    Created,
    NoContent,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Conflict,
    ServerError,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Continue => 100,
            Status::Ok => 200,
            Status::Created => 201,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::Conflict => 409,
            Status::ServerError => 500,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ProtocolError> {
        match code {
            100 => Ok(Status::Continue),
            200 => Ok(Status::Ok),
            201 => Ok(Status::Created),
            204 => Ok(Status::NoContent),
            400 => Ok(Status::BadRequest),
            404 => Ok(Status::NotFound),
            405 => Ok(Status::MethodNotAllowed),
            409 => Ok(Status::Conflict),
            500 => Ok(Status::ServerError),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }

    /// Non-terminal frame: more frames follow in the same exchange.
    pub fn is_continue(&self) -> bool {
        self.code() < 200
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_continue()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }

    pub fn is_server_error(&self) -> bool {
        self.code() >= 500
    }

    /// Canonical reason phrase.
    pub fn reason(&self) -> &'static str {
        match self {
            Status::Continue => "Continue",
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::NoContent => "No Content",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::Conflict => "Conflict",
            Status::ServerError => "Server Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub resource: String,
    pub data: Vec<Value>,
}

impl Request {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            data: Vec::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.data.push(value.into());
        self
    }

    /// Parses a request message.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.split(FIELD_DELIMITER);

        let method = match fields.next() {
            Some(token) if !token.trim().is_empty() => Method::parse(token.trim()),
            _ => return Err(ProtocolError::MalformedRequest("missing method".to_string())),
        };
        let resource = match fields.next() {
            Some(token) if !token.trim().is_empty() => token.trim().to_string(),
            _ => {
                return Err(ProtocolError::MalformedRequest(
                    "missing resource".to_string(),
                ))
            }
        };

        let data = fields
            .enumerate()
            .map(|(i, field)| {
                Value::decode(field).map_err(|e| {
                    ProtocolError::MalformedRequest(format!("argument {}: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            method,
            resource,
            data,
        })
    }

    /// Renders the request line.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = format!("{}{}{}", self.method, FIELD_DELIMITER, self.resource);
        for value in &self.data {
            line.push(FIELD_DELIMITER);
            line.push_str(&value.encode()?);
        }
        Ok(line)
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.data.get(index)
    }
}

/// A single response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub data: Vec<Value>,
}

impl Response {
    pub fn new(status: Status, data: Vec<Value>) -> Self {
        Self { status, data }
    }

    pub fn empty(status: Status) -> Self {
        Self::new(status, Vec::new())
    }

    /// Renders the frame. An empty value list renders only the status code.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = self.status.code().to_string();
        for value in &self.data {
            line.push(FIELD_DELIMITER);
            line.push_str(&value.encode()?);
        }
        Ok(line)
    }

    /// Parses a response frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.split(FIELD_DELIMITER);

        let code = fields
            .next()
            .and_then(|token| token.trim().parse::<u16>().ok())
            .ok_or_else(|| ProtocolError::MalformedResponse(format!("bad status in {:?}", line)))?;
        let status = Status::from_code(code)?;
        let data = fields.map(Value::decode).collect::<Result<Vec<_>, _>>()?;

        Ok(Self { status, data })
    }

    pub fn is_continue(&self) -> bool {
        self.status.is_continue()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NodeSnapshot;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_request_line() {
        let request = Request::parse(b"PUT\tnode\t0\t[\"Person\"]\t{\"name\":\"Alice\"}").unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.resource, "node");
        assert_eq!(request.data.len(), 3);
        assert_eq!(request.data[0], Value::Int(0));
        assert_eq!(request.data[1], Value::List(vec![Value::from("Person")]));
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), Value::from("Alice"));
        assert_eq!(request.data[2], Value::Map(props));
    }

    #[test]
    fn test_parse_request_without_arguments() {
        let request = Request::parse(b"GET\tnodeset").unwrap();
        assert_eq!(request.method, Method::Get);
        assert!(request.data.is_empty());
    }

    #[test]
    fn test_parse_request_strips_line_ending() {
        let request = Request::parse(b"GET\tnode\t4\r\n").unwrap();
        assert_eq!(request.data, vec![Value::Int(4)]);
    }

    #[test]
    fn test_parse_request_keeps_unknown_method() {
        let request = Request::parse(b"BREW\tnode").unwrap();
        assert_eq!(request.method, Method::Other("BREW".to_string()));
        assert_eq!(request.method.to_string(), "BREW");
    }

    #[test]
    fn test_parse_request_missing_resource() {
        for input in [&b""[..], b"GET", b"GET\t", b"\tnode"] {
            let err = Request::parse(input).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedRequest(_)),
                "{:?}",
                input
            );
        }
    }

    #[test]
    fn test_parse_request_bad_argument() {
        let err = Request::parse(b"GET\tnode\tnot-json").unwrap_err();
        match err {
            ProtocolError::MalformedRequest(msg) => assert!(msg.contains("argument 0")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_request_invalid_utf8() {
        let err = Request::parse(&[0x47, 0xFF, 0x09, 0x6E]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_request_encode_parse() {
        let request = Request::new(Method::Post, "cypher")
            .with_arg("MATCH (n) RETURN n")
            .with_arg(Value::Map(BTreeMap::new()));
        let line = request.encode().unwrap();
        assert_eq!(line, "POST\tcypher\t\"MATCH (n) RETURN n\"\t{}");
        assert_eq!(Request::parse(line.as_bytes()).unwrap(), request);
    }

    #[test]
    fn test_response_encode() {
        assert_eq!(Response::empty(Status::NoContent).encode().unwrap(), "204");

        let node = NodeSnapshot::new(0)
            .with_label("Person")
            .with_property("name", "Alice");
        let response = Response::new(Status::Ok, vec![Value::Node(node)]);
        assert_eq!(
            response.encode().unwrap(),
            "200\t/*Node*/{\"id\":0,\"labels\":[\"Person\"],\"properties\":{\"name\":\"Alice\"}}"
        );
    }

    #[test]
    fn test_response_parse() {
        let response = Response::parse(b"100\t\"n\"\t\"n.name\"").unwrap();
        assert!(response.is_continue());
        assert_eq!(response.data, vec![Value::from("n"), Value::from("n.name")]);

        let response = Response::parse(b"405\t\"BREW\"").unwrap();
        assert_eq!(response.status, Status::MethodNotAllowed);
        assert!(response.is_terminal());
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(matches!(
            Response::parse(b"abc").unwrap_err(),
            ProtocolError::MalformedResponse(_)
        ));
        assert!(matches!(
            Response::parse(b"299").unwrap_err(),
            ProtocolError::UnknownStatus(299)
        ));
    }

    #[test]
    fn test_status_classes() {
        assert!(Status::Continue.is_continue());
        assert!(Status::Created.is_success());
        assert!(Status::NoContent.is_terminal());
        assert!(Status::MethodNotAllowed.is_client_error());
        assert!(Status::ServerError.is_server_error());
        assert!(!Status::Conflict.is_server_error());

        for status in [
            Status::Continue,
            Status::Ok,
            Status::Created,
            Status::NoContent,
            Status::BadRequest,
            Status::NotFound,
            Status::MethodNotAllowed,
            Status::Conflict,
            Status::ServerError,
        ] {
            assert_eq!(Status::from_code(status.code()).unwrap(), status);
        }
        assert_eq!(Status::NotFound.to_string(), "404 Not Found");
    }
}
