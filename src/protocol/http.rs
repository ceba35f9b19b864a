//! Minimal HTTP/1.1 protocol handler.
//!
//! # Responsibilities
//! - Recognize HTTP request bytes during sniffing
//! - Parse the request head and hand it to the configured service
//! - Write the service's response and close
//!
//! # Design Decisions
//! - Full HTTP semantics are out of scope; this handler serves one request
//!   per connection with `Connection: close`
//! - `matches` stays `Indeterminate` until the header block is complete, so
//!   an earlier-ordered websocket handler sees an upgrade request first
//! - Body bytes are drained (Content-Length) but not exposed to the service

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::core::ordered::Ordered;
use crate::net::connection::Connection;
use crate::protocol::{ProtocolError, ProtocolHandler, SniffOutcome};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEAD_BYTES: usize = 64 * 1024;
const METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE", "CONNECT",
];

/// Default priority; later than the websocket handler so upgrades win.
pub const DEFAULT_HTTP_ORDER: i32 = 200;

/// A parsed request head.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response returned by an [`HttpService`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.into().into_bytes(),
        }
    }

    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "OK",
        }
    }
}

/// Application logic plugged into the HTTP handler.
pub type HttpService = dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync;

/// Protocol handler for plain HTTP requests.
pub struct HttpProtocol {
    order: i32,
    service: Arc<HttpService>,
}

impl HttpProtocol {
    pub fn new<F>(service: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            order: DEFAULT_HTTP_ORDER,
            service: Arc::new(service),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl Ordered for HttpProtocol {
    fn order(&self) -> i32 {
        self.order
    }
}

#[async_trait]
impl ProtocolHandler for HttpProtocol {
    fn name(&self) -> &str {
        "http"
    }

    fn matches(&self, prefix: &[u8]) -> SniffOutcome {
        if !starts_like_http_method(prefix) {
            return SniffOutcome::NoMatch;
        }
        if find_terminator(prefix).is_none() {
            return SniffOutcome::Indeterminate;
        }
        SniffOutcome::Match
    }

    async fn serve(&self, conn: Connection) -> Result<(), ProtocolError> {
        let id = conn.id();
        let mut stream = conn.into_stream();

        let (request, body_len) = read_head(&mut stream).await?;
        drain_body(&mut stream, body_len).await?;

        tracing::debug!(%id, method = %request.method, path = %request.path, "http request");

        let response = (self.service)(&request);
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            response.status,
            response.reason(),
            response.content_type,
            response.body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&response.body).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// True when the prefix could still be an HTTP request line.
fn starts_like_http_method(prefix: &[u8]) -> bool {
    METHODS.iter().any(|method| {
        let token = method.as_bytes();
        if prefix.len() <= token.len() {
            token.starts_with(prefix)
        } else {
            prefix.starts_with(token) && prefix[token.len()] == b' '
        }
    })
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

async fn read_head<S>(stream: &mut S) -> Result<(HttpRequest, usize), ProtocolError>
where
    S: AsyncReadExt + Unpin,
{
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ProtocolError::Pipeline("eof before end of request head".into()));
        }
        head.push(byte[0]);
        if head.ends_with(HEADER_TERMINATOR) {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(ProtocolError::Pipeline("request head too large".into()));
        }
    }

    let text = String::from_utf8(head)
        .map_err(|_| ProtocolError::Pipeline("request head is not valid utf-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| ProtocolError::Pipeline("empty request head".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProtocolError::Pipeline("missing method".into()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| ProtocolError::Pipeline("missing request target".into()))?
        .to_string();
    let version = parts.next().unwrap_or("HTTP/1.1").to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let request = HttpRequest {
        method,
        path,
        version,
        headers,
    };
    let body_len = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    Ok((request, body_len))
}

async fn drain_body<S>(stream: &mut S, mut remaining: usize) -> Result<(), ProtocolError>
where
    S: AsyncReadExt + Unpin,
{
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let n = stream.read(&mut scratch[..want]).await?;
        if n == 0 {
            return Err(ProtocolError::Pipeline("eof inside request body".into()));
        }
        remaining -= n;
    }
    Ok(())
}
