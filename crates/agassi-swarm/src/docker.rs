//! Docker Engine API client over the local unix socket.
//!
//! Only the swarm calls agassi needs: list and inspect services, list
//! networks, and follow the service event stream. Each call opens its
//! own connection through the shared hyper client.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use agassi_store::http_client::{self, HttpError};
use bytes::{Buf, BytesMut};
use http::Method;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::descriptor::{NetworkDescriptor, OrchestratorEvent, ServiceDescriptor};
use crate::error::{OrchestratorError, OrchestratorResult};

/// `{"type":["service"]}`, URL-encoded.
const SERVICE_EVENTS: &str = "/events?filters=%7B%22type%22%3A%5B%22service%22%5D%7D";

/// The orchestrator API agassi consumes.
pub trait Orchestrator: Send + Sync {
    fn list_services(&self) -> impl Future<Output = OrchestratorResult<Vec<ServiceDescriptor>>> + Send;

    fn inspect_service(
        &self,
        id: &str,
    ) -> impl Future<Output = OrchestratorResult<ServiceDescriptor>> + Send;

    fn list_networks(&self) -> impl Future<Output = OrchestratorResult<Vec<NetworkDescriptor>>> + Send;

    /// Follow the service event stream, forwarding each event in
    /// arrival order. Returns when the stream or the receiver closes.
    fn events(
        &self,
        tx: mpsc::UnboundedSender<OrchestratorEvent>,
    ) -> impl Future<Output = OrchestratorResult<()>> + Send;
}

/// Find the overlay network labelled `key=value`.
pub async fn find_network<O: Orchestrator>(
    orchestrator: &O,
    key: &str,
    value: &str,
) -> OrchestratorResult<NetworkDescriptor> {
    orchestrator
        .list_networks()
        .await?
        .into_iter()
        .find(|n| n.labels.get(key).is_some_and(|v| v == value))
        .ok_or_else(|| OrchestratorError::NetworkNotFound {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> OrchestratorResult<UnixStream> {
        UnixStream::connect(&self.socket).await.map_err(|source| {
            HttpError::Connect {
                addr: self.socket.display().to_string(),
                source,
            }
            .into()
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> OrchestratorResult<T> {
        let exchange = async {
            let stream = self.connect().await?;
            let request = http_client::build_request(Method::GET, "docker", path, None)?;
            let response = http_client::send_over(stream, request).await?;
            Ok::<_, OrchestratorError>(http_client::collect(response).await?)
        };
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| HttpError::Timeout(self.timeout))??;

        if !response.status.is_success() {
            return Err(OrchestratorError::Status {
                status: response.status.as_u16(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        debug!(path, bytes = response.body.len(), "docker response");
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl Orchestrator for DockerClient {
    async fn list_services(&self) -> OrchestratorResult<Vec<ServiceDescriptor>> {
        self.get_json("/services").await
    }

    async fn inspect_service(&self, id: &str) -> OrchestratorResult<ServiceDescriptor> {
        self.get_json(&format!("/services/{id}")).await
    }

    async fn list_networks(&self) -> OrchestratorResult<Vec<NetworkDescriptor>> {
        self.get_json("/networks").await
    }

    async fn events(&self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> OrchestratorResult<()> {
        let stream = self.connect().await?;
        let request = http_client::build_request(Method::GET, "docker", SERVICE_EVENTS, None)?;
        let response = http_client::send_over(stream, request).await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = http_client::collect(response).await?;
            return Err(OrchestratorError::Status {
                status,
                body: String::from_utf8_lossy(&body.body).into_owned(),
            });
        }
        info!("following docker service events");

        let mut body = response.into_body();
        let mut buf = BytesMut::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(HttpError::Body)?;
            let Ok(data) = frame.into_data() else { continue };
            buf.extend_from_slice(&data);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.split_to(pos + 1);
                let line = &line[..pos];
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<OrchestratorEvent>(line) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            debug!("event receiver dropped");
                            return Ok(());
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping undecodable docker event"),
                }
            }
        }
        if buf.has_remaining() {
            debug!(bytes = buf.len(), "docker event stream ended mid-frame");
        }
        info!("docker event stream closed");
        Ok(())
    }
}
