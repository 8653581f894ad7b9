//! Error types for certificate sharing.

use std::net::IpAddr;
use std::time::Duration;

use agassi_store::http_client::HttpError;
use thiserror::Error;

pub type ShareResult<T> = Result<T, ShareError>;

/// Failures of a single peer exchange. Sync rounds swallow these per
/// peer; they only reach callers of `pull`.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("peer {peer} unreachable: {source}")]
    PeerUnreachable {
        peer: IpAddr,
        #[source]
        source: HttpError,
    },

    #[error("peer {peer} timed out after {after:?}")]
    Timeout { peer: IpAddr, after: Duration },

    #[error("peer {peer} answered {status}")]
    Status { peer: IpAddr, status: u16 },

    #[error("peer {peer} sent an undecodable body: {reason}")]
    Decode { peer: IpAddr, reason: String },

    #[error("certificate for {domain} does not match fingerprint {expected}")]
    FingerprintMismatch { domain: String, expected: String },

    #[error("no peers to ask")]
    NoPeers,

    #[error("no peer could supply the requested certificates")]
    Exhausted,
}
