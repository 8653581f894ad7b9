//! Table definitions for the replicated store.
//!
//! Every statement is idempotent so any node that wins leadership can
//! run `create_schema` on startup.

use tracing::debug;

use crate::client::{Statement, StoreClient};
use crate::error::StoreResult;

/// Routed services keyed by orchestrator id. `options` is a JSON object.
pub const CREATE_SERVICES: &str = "CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY NOT NULL,
    domain TEXT NOT NULL,
    protocol TEXT,
    hostname TEXT,
    port INTEGER,
    auth TEXT,
    options TEXT
)";

/// Certificates keyed by domain.
pub const CREATE_CERTIFICATES: &str = "CREATE TABLE IF NOT EXISTS certificates (
    domain TEXT PRIMARY KEY NOT NULL,
    fingerprint TEXT NOT NULL,
    cert_pem TEXT NOT NULL,
    key_pem TEXT NOT NULL,
    issued_at INTEGER NOT NULL
)";

/// Pending ACME challenges keyed by token.
pub const CREATE_CHALLENGES: &str = "CREATE TABLE IF NOT EXISTS challenges (
    token TEXT PRIMARY KEY NOT NULL,
    response TEXT NOT NULL,
    domain TEXT NOT NULL,
    acme_order TEXT,
    expires_at INTEGER NOT NULL
)";

/// Create all tables in one transaction.
pub async fn create_schema<C: StoreClient>(client: &C) -> StoreResult<()> {
    let result = client
        .transact(vec![
            Statement::new(CREATE_SERVICES),
            Statement::new(CREATE_CHALLENGES),
            Statement::new(CREATE_CERTIFICATES),
        ])
        .await?;
    debug!(time = ?result.time, "store schema ensured");
    Ok(())
}
