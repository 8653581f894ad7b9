//! agassi-store — replicated store access for agassi.
//!
//! The replicated store is an rqlite cluster. This crate owns everything
//! the rest of the system needs from it: the query/execute/transact seam
//! (`StoreClient`), the rqlite HTTP client, the record types and schema,
//! typed repositories, the readiness monitor, and the launcher that
//! spawns the local `rqlited` process with the bootstrap decision.
//!
//! # Architecture
//!
//! ```text
//! Repository<C: StoreClient>
//!   ├── services      (ServiceRecord, keyed by orchestrator id)
//!   ├── certificates  (CertificateRecord, keyed by domain)
//!   └── challenges    (ChallengeRecord, keyed by ACME token)
//!
//! StoreClient
//!   ├── RqliteClient  (HTTP, parameterized statements)
//!   └── SqliteClient  (in-process, feature `sqlite`)
//! ```
//!
//! Values are always bound as statement parameters, never spliced into
//! SQL text.

pub mod client;
pub mod error;
pub mod http_client;
pub mod launcher;
pub mod repo;
pub mod rqlite;
pub mod schema;
#[cfg(any(test, feature = "sqlite"))]
pub mod sqlite;
pub mod status;
pub mod types;

pub use client::{Consistency, ExecuteResult, QueryResult, Row, Statement, StoreClient};
pub use error::{StoreError, StoreResult};
pub use launcher::{LaunchPlan, RqlitedConfig, RqlitedLauncher, StoreHandle, StoreLauncher};
pub use repo::Repository;
pub use rqlite::RqliteClient;
#[cfg(any(test, feature = "sqlite"))]
pub use sqlite::SqliteClient;
pub use status::{ReadinessProbe, StatusMonitor, StatusTracker, StoreSignal};
pub use types::*;
