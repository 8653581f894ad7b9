//! Peer transport — how one node talks to another's share endpoints.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/certs/list` | → `{domain: fingerprint}` |
//! | GET | `/certs?q=<hash>&q=<hash>` | → `{hash: bundle}` |
//! | POST | `/` | `{hash: bundle}` → 204 |

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use agassi_store::http_client::{self, HttpError, HttpResponse};
use http::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::bundle::CertificateBundle;
use crate::cache::Inventory;
use crate::error::{ShareError, ShareResult};

/// Bundles keyed by fingerprint, the payload of `/certs` and `POST /`.
pub type Bundles = BTreeMap<String, CertificateBundle>;

/// Client side of the share protocol.
pub trait PeerTransport: Clone + Send + Sync + 'static {
    fn fetch_inventory(&self, peer: IpAddr) -> impl Future<Output = ShareResult<Inventory>> + Send;

    fn fetch_certs(
        &self,
        peer: IpAddr,
        hashes: Vec<String>,
    ) -> impl Future<Output = ShareResult<Bundles>> + Send;

    fn push(&self, peer: IpAddr, bundles: Bundles) -> impl Future<Output = ShareResult<()>> + Send;
}

/// HTTP transport to peers' share port.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    port: u16,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: Duration::from_secs(10),
        }
    }

    /// Upper bound per request; sync applies its own tighter deadlines.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(
        &self,
        peer: IpAddr,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ShareResult<HttpResponse> {
        let addr = SocketAddr::new(peer, self.port).to_string();
        let response = http_client::request(&addr, method, path, body, self.timeout)
            .await
            .map_err(|e| match e {
                HttpError::Timeout(after) => ShareError::Timeout { peer, after },
                source => ShareError::PeerUnreachable { peer, source },
            })?;
        if !response.status.is_success() {
            return Err(ShareError::Status {
                peer,
                status: response.status.as_u16(),
            });
        }
        Ok(response)
    }

    fn decode<T: DeserializeOwned>(peer: IpAddr, response: &HttpResponse) -> ShareResult<T> {
        serde_json::from_slice(&response.body).map_err(|e| ShareError::Decode {
            peer,
            reason: e.to_string(),
        })
    }
}

/// `/certs?q=..&q=..`; hashes that are not plain hex are dropped.
pub fn certs_query(hashes: &[String]) -> String {
    let params: Vec<String> = hashes
        .iter()
        .filter(|h| !h.is_empty() && h.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|h| format!("q={h}"))
        .collect();
    format!("/certs?{}", params.join("&"))
}

impl PeerTransport for HttpTransport {
    async fn fetch_inventory(&self, peer: IpAddr) -> ShareResult<Inventory> {
        let response = self.call(peer, Method::GET, "/certs/list", None).await?;
        let inventory: Inventory = Self::decode(peer, &response)?;
        debug!(%peer, certs = inventory.len(), "fetched peer inventory");
        Ok(inventory)
    }

    async fn fetch_certs(&self, peer: IpAddr, hashes: Vec<String>) -> ShareResult<Bundles> {
        let response = self
            .call(peer, Method::GET, &certs_query(&hashes), None)
            .await?;
        let bundles: Bundles = Self::decode(peer, &response)?;
        debug!(%peer, requested = hashes.len(), received = bundles.len(), "fetched certificates");
        Ok(bundles)
    }

    async fn push(&self, peer: IpAddr, bundles: Bundles) -> ShareResult<()> {
        let body = serde_json::to_vec(&bundles).map_err(|e| ShareError::Decode {
            peer,
            reason: e.to_string(),
        })?;
        self.call(peer, Method::POST, "/", Some(body)).await?;
        debug!(%peer, certs = bundles.len(), "pushed certificates");
        Ok(())
    }
}
