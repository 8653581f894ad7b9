//! Plain-HTTP listener: ACME HTTP-01 challenge answers and the HTTPS
//! redirect for everything else.

use agassi_store::{Repository, StoreClient, unix_now};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

/// Build the challenge/redirect router over the store.
pub fn router<C: StoreClient>(repo: Repository<C>) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/{token}", get(challenge::<C>))
        .fallback(redirect)
        .with_state(repo)
}

/// GET /.well-known/acme-challenge/{token}
async fn challenge<C: StoreClient>(
    State(repo): State<Repository<C>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-");
    match repo.get_challenge(&token, unix_now()).await {
        Ok(Some(record)) => {
            debug!(%host, domain = %record.domain, "answering ACME challenge");
            (
                [(header::CONTENT_TYPE, "text/plain")],
                record.response,
            )
                .into_response()
        }
        Ok(None) => {
            warn!(%host, %token, "no challenge response for token");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!(%host, %token, error = %e, "challenge lookup failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Everything else: `301` to the same host and path over HTTPS.
async fn redirect(headers: HeaderMap, uri: Uri) -> Response {
    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing host header").into_response();
    };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = format!("https://{host}{path}");
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}
