//! Minimal HTTP/1.1 client shared by the store, orchestrator and peer clients.
//!
//! One connection per request, driven by hyper's low-level `conn` API.
//! Callers pick the stream (TCP or unix socket) and the deadline.

use std::time::Duration;

use bytes::Bytes;
use ::http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

const USER_AGENT: &str = "agassi/0.1";

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake: {0}")]
    Handshake(hyper::Error),

    #[error("send: {0}")]
    Send(hyper::Error),

    #[error("read body: {0}")]
    Body(hyper::Error),

    #[error("build request: {0}")]
    Build(#[from] ::http::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl HttpError {
    /// Whether the peer could not be reached at all (as opposed to
    /// answering badly).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, HttpError::Connect { .. } | HttpError::Timeout(_))
    }
}

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Build a request with the headers every agassi client sends.
pub fn build_request(
    method: Method,
    host: &str,
    path_and_query: &str,
    body: Option<Vec<u8>>,
) -> Result<Request<Full<Bytes>>, HttpError> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path_and_query)
        .header("host", host)
        .header("user-agent", USER_AGENT);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let body = Full::new(Bytes::from(body.unwrap_or_default()));
    Ok(builder.body(body)?)
}

/// Send a request over an already-connected stream and return the
/// streaming response.
pub async fn send_over<S>(
    stream: S,
    request: Request<Full<Bytes>>,
) -> Result<Response<Incoming>, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(HttpError::Handshake)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    sender.send_request(request).await.map_err(HttpError::Send)
}

/// Read a response body to completion.
pub async fn collect(response: Response<Incoming>) -> Result<HttpResponse, HttpError> {
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(HttpError::Body)?
        .to_bytes();
    Ok(HttpResponse { status, body })
}

/// Connect to `addr` over TCP, send one request and read the full
/// response, all within `timeout`.
pub async fn request(
    addr: &str,
    method: Method,
    path_and_query: &str,
    body: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    let exchange = async move {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| HttpError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let req = build_request(method, addr, path_and_query, body)?;
        let resp = send_over(stream, req).await?;
        collect(resp).await
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%addr, path = path_and_query, "request timed out");
            Err(HttpError::Timeout(timeout))
        }
    }
}
