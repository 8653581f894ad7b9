//! agassi-share — certificate sharing between agassi nodes.
//!
//! Every node keeps the certificates it can serve in a local cache and
//! exposes that inventory to its peers. Peers converge by comparing
//! fingerprints rather than domains, so renewals propagate.
//!
//! # Architecture
//!
//! ```text
//! CertSync<T: PeerTransport>
//!   ├── sync_all   inventories (parallel) → needed → ranked pulls
//!   ├── push       best effort to every peer
//!   └── pull       round-robin primary, then race the rest
//!
//! HttpTransport  ──HTTP──▶  server::router (axum)
//!                             GET /certs/list, GET /certs?q=, POST /
//!
//! CertificateCache  domain → CertificateBundle, SNI resolution
//! ```

pub mod bundle;
pub mod cache;
pub mod error;
pub mod server;
pub mod sync;
pub mod transport;

pub use bundle::{CertificateBundle, fingerprint};
pub use cache::{CertificateCache, Inventory};
pub use error::{ShareError, ShareResult};
pub use sync::{CertSync, PushReport, SyncConfig, SyncReport};
pub use transport::{Bundles, HttpTransport, PeerTransport};
