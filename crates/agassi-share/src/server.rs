//! Share endpoints served to peers on the share port.
//!
//! Pushes are only taken from addresses in the peer set, and never with an
//! `issued_at` further ahead than `MAX_CLOCK_SKEW`: the cache refuses
//! anything older than what it holds, so one such bundle would pin a domain.

use std::net::SocketAddr;

use agassi_cluster::PeerSet;
use agassi_store::{Timestamp, unix_now};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, warn};

use crate::cache::CertificateCache;
use crate::transport::Bundles;

/// How far ahead of our clock a pushed `issued_at` may be.
pub const MAX_CLOCK_SKEW: Timestamp = 300;

#[derive(Clone)]
struct ShareState {
    cache: CertificateCache,
    peers: PeerSet,
}

/// Build the share router over a certificate cache.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// pushes are checked against the sender's address.
pub fn router(cache: CertificateCache, peers: PeerSet) -> Router {
    Router::new()
        .route("/certs/list", get(list))
        .route("/certs", get(fetch))
        .route("/", post(receive))
        .with_state(ShareState { cache, peers })
}

/// GET /certs/list
async fn list(State(state): State<ShareState>) -> impl IntoResponse {
    Json(state.cache.inventory())
}

/// GET /certs?q=<hash>&q=<hash>
async fn fetch(
    State(state): State<ShareState>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let hashes: Vec<String> = params
        .into_iter()
        .filter(|(key, _)| key == "q")
        .map(|(_, hash)| hash)
        .collect();
    let found = state.cache.by_fingerprints(&hashes);
    debug!(requested = hashes.len(), found = found.len(), "serving certificates to peer");
    Json(found)
}

/// POST / with `{hash: bundle}`. Rejected whole if the sender is not a
/// known peer or any bundle fails verification.
async fn receive(
    State(state): State<ShareState>,
    ConnectInfo(from): ConnectInfo<SocketAddr>,
    Json(bundles): Json<Bundles>,
) -> Response {
    if !state.peers.contains(from.ip()) {
        warn!(%from, "rejecting certificate push from unknown sender");
        return (StatusCode::FORBIDDEN, "unknown peer").into_response();
    }
    if let Some((hash, bundle)) = bundles.iter().find(|(hash, bundle)| !bundle.matches(hash)) {
        warn!(%from, domain = %bundle.domain, %hash, "rejecting pushed certificate with wrong fingerprint");
        return (StatusCode::BAD_REQUEST, "fingerprint mismatch").into_response();
    }
    let horizon = unix_now() + MAX_CLOCK_SKEW;
    if let Some(bundle) = bundles.values().find(|bundle| bundle.issued_at > horizon) {
        warn!(%from, domain = %bundle.domain, issued_at = bundle.issued_at, "rejecting pushed certificate issued in the future");
        return (StatusCode::BAD_REQUEST, "issued_at in the future").into_response();
    }
    for bundle in bundles.into_values() {
        let domain = bundle.domain.clone();
        if state.cache.insert(bundle) {
            debug!(%from, %domain, "accepted pushed certificate");
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::bundle::CertificateBundle;
    use crate::cache::Inventory;

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 9, 2));

    fn bundle(domain: &str) -> CertificateBundle {
        CertificateBundle {
            domain: domain.to_string(),
            cert_pem: format!("cert-{domain}"),
            key_pem: format!("key-{domain}"),
            issued_at: 1,
        }
    }

    /// Router whose requests appear to come from `from`, with `PEER` known.
    fn app(cache: CertificateCache, from: IpAddr) -> Router {
        let peers = PeerSet::new();
        peers.add(PEER);
        router(cache, peers).layer(MockConnectInfo(SocketAddr::new(from, 40000)))
    }

    fn push(bundles: &Bundles) -> Request<Body> {
        Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(bundles).unwrap()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: Response) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_returns_inventory() {
        let cache = CertificateCache::new();
        let a = bundle("a.com");
        cache.insert(a.clone());

        let resp = app(cache, PEER)
            .oneshot(Request::get("/certs/list").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let inventory: Inventory = body_json(resp).await;
        assert_eq!(inventory["a.com"], a.fingerprint());
    }

    #[tokio::test]
    async fn fetch_returns_only_requested() {
        let cache = CertificateCache::new();
        let a = bundle("a.com");
        let b = bundle("b.com");
        cache.insert(a.clone());
        cache.insert(b);

        let uri = format!("/certs?q={}&q=deadbeef", a.fingerprint());
        let resp = app(cache, PEER)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let found: Bundles = body_json(resp).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[&a.fingerprint()], a);
    }

    #[tokio::test]
    async fn push_is_verified() {
        let cache = CertificateCache::new();
        let app = app(cache.clone(), PEER);
        let good = bundle("good.com");
        let bad = bundle("bad.com");

        let forged = Bundles::from([("00ff".to_string(), bad)]);
        let resp = app.clone().oneshot(push(&forged)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(cache.is_empty());

        let valid = Bundles::from([(good.fingerprint(), good.clone())]);
        let resp = app.oneshot(push(&valid)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(cache.get("good.com"), Some(good));
    }

    #[tokio::test]
    async fn push_from_unknown_sender_is_forbidden() {
        let cache = CertificateCache::new();
        let good = bundle("good.com");
        let stranger = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

        let resp = app(cache.clone(), stranger)
            .oneshot(push(&Bundles::from([(good.fingerprint(), good)])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn push_issued_in_the_future_cannot_pin_a_domain() {
        let cache = CertificateCache::new();
        let app = app(cache.clone(), PEER);
        let pinned = CertificateBundle {
            issued_at: unix_now() + 10 * 365 * 24 * 3600,
            ..bundle("x.com")
        };

        let resp = app
            .clone()
            .oneshot(push(&Bundles::from([(pinned.fingerprint(), pinned)])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(cache.is_empty());

        // A renewal stamped now is still accepted.
        let renewed = CertificateBundle {
            issued_at: unix_now(),
            ..bundle("x.com")
        };
        let resp = app
            .oneshot(push(&Bundles::from([(renewed.fingerprint(), renewed.clone())])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(cache.get("x.com"), Some(renewed));
    }
}
