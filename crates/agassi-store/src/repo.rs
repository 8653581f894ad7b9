//! Repository — typed access to the replicated store's tables.
//!
//! Wraps any `StoreClient` with CRUD operations over services,
//! certificates, and challenges. Every value travels as a bound
//! parameter; column names only ever come from `ServiceColumn`.

use tracing::debug;

use crate::client::{Consistency, ExecuteResult, Statement, StoreClient};
use crate::error::StoreResult;
use crate::types::*;

/// Typed table access over a store client.
#[derive(Debug, Clone)]
pub struct Repository<C> {
    client: C,
}

impl<C: StoreClient> Repository<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Access the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    // ── Services ───────────────────────────────────────────────────

    /// Fetch a service by id.
    pub async fn get_service(
        &self,
        id: &str,
        consistency: Consistency,
    ) -> StoreResult<Option<ServiceRecord>> {
        let result = self
            .client
            .query(
                Statement::new(
                    "SELECT id, domain, protocol, hostname, port, auth, options \
                     FROM services WHERE id = ?",
                )
                .bind(id),
                consistency,
            )
            .await?;
        result.rows.first().map(ServiceRecord::from_row).transpose()
    }

    /// Insert a new service.
    pub async fn insert_service(&self, record: &ServiceRecord) -> StoreResult<ExecuteResult> {
        let mut stmt = Statement::new(
            "INSERT INTO services (id, domain, protocol, hostname, port, auth, options) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str());
        for column in ServiceColumn::ALL {
            stmt = stmt.bind(column.value(record));
        }
        let result = self.client.execute(stmt).await?;
        debug!(id = %record.id, time = ?result.time, "service inserted");
        Ok(result)
    }

    /// Overwrite only the given columns of an existing service.
    ///
    /// A no-op (no statement sent) when `columns` is empty.
    pub async fn update_service_columns(
        &self,
        record: &ServiceRecord,
        columns: &[ServiceColumn],
    ) -> StoreResult<ExecuteResult> {
        if columns.is_empty() {
            return Ok(ExecuteResult::default());
        }

        let assignments: Vec<String> = columns
            .iter()
            .map(|column| format!("{} = ?", column.name()))
            .collect();
        let sql = format!("UPDATE services SET {} WHERE id = ?", assignments.join(", "));

        let mut stmt = Statement::new(sql);
        for column in columns {
            stmt = stmt.bind(column.value(record));
        }
        stmt = stmt.bind(record.id.as_str());

        let result = self.client.execute(stmt).await?;
        debug!(id = %record.id, columns = columns.len(), time = ?result.time, "service updated");
        Ok(result)
    }

    /// Delete a service. Returns true if a row was removed.
    pub async fn delete_service(&self, id: &str) -> StoreResult<bool> {
        let result = self
            .client
            .execute(Statement::new("DELETE FROM services WHERE id = ?").bind(id))
            .await?;
        debug!(%id, time = ?result.time, "service deleted");
        Ok(result.rows_affected > 0)
    }

    /// All stored service ids (strong read).
    pub async fn list_service_ids(&self) -> StoreResult<Vec<String>> {
        let result = self
            .client
            .query(Statement::new("SELECT id FROM services"), Consistency::Strong)
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|v| v.as_str()).map(String::from))
            .collect())
    }

    // ── Certificates ───────────────────────────────────────────────

    /// Store a certificate, replacing any previous one for the domain.
    pub async fn put_certificate(&self, record: &CertificateRecord) -> StoreResult<()> {
        let stmt = Statement::new(
            "INSERT OR REPLACE INTO certificates \
             (domain, fingerprint, cert_pem, key_pem, issued_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.domain.as_str())
        .bind(record.fingerprint.as_str())
        .bind(record.cert_pem.as_str())
        .bind(record.key_pem.as_str())
        .bind(record.issued_at);
        self.client.execute(stmt).await?;
        debug!(domain = %record.domain, fingerprint = %record.fingerprint, "certificate stored");
        Ok(())
    }

    pub async fn get_certificate(&self, domain: &str) -> StoreResult<Option<CertificateRecord>> {
        let result = self
            .client
            .query(
                Statement::new(
                    "SELECT domain, fingerprint, cert_pem, key_pem, issued_at \
                     FROM certificates WHERE domain = ?",
                )
                .bind(domain),
                Consistency::Weak,
            )
            .await?;
        result.rows.first().map(CertificateRecord::from_row).transpose()
    }

    pub async fn list_certificates(&self) -> StoreResult<Vec<CertificateRecord>> {
        let result = self
            .client
            .query(
                Statement::new(
                    "SELECT domain, fingerprint, cert_pem, key_pem, issued_at FROM certificates",
                ),
                Consistency::Weak,
            )
            .await?;
        result.rows.iter().map(CertificateRecord::from_row).collect()
    }

    pub async fn delete_certificate(&self, domain: &str) -> StoreResult<bool> {
        let result = self
            .client
            .execute(Statement::new("DELETE FROM certificates WHERE domain = ?").bind(domain))
            .await?;
        Ok(result.rows_affected > 0)
    }

    // ── Challenges ─────────────────────────────────────────────────

    pub async fn put_challenge(&self, record: &ChallengeRecord) -> StoreResult<()> {
        let stmt = Statement::new(
            "INSERT OR REPLACE INTO challenges \
             (token, response, domain, acme_order, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.token.as_str())
        .bind(record.response.as_str())
        .bind(record.domain.as_str())
        .bind(record.acme_order_id.as_str())
        .bind(record.expires_at);
        self.client.execute(stmt).await?;
        Ok(())
    }

    /// Look up a challenge by token. Expired challenges are not returned.
    pub async fn get_challenge(
        &self,
        token: &str,
        now: Timestamp,
    ) -> StoreResult<Option<ChallengeRecord>> {
        let result = self
            .client
            .query(
                Statement::new(
                    "SELECT token, response, domain, acme_order, expires_at \
                     FROM challenges WHERE token = ?",
                )
                .bind(token),
                Consistency::Weak,
            )
            .await?;
        let challenge = result.rows.first().map(ChallengeRecord::from_row).transpose()?;
        Ok(challenge.filter(|c| !c.is_expired(now)))
    }

    pub async fn delete_challenge(&self, token: &str) -> StoreResult<bool> {
        let result = self
            .client
            .execute(Statement::new("DELETE FROM challenges WHERE token = ?").bind(token))
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Remove every challenge that expired at or before `now`.
    pub async fn purge_expired_challenges(&self, now: Timestamp) -> StoreResult<u64> {
        let result = self
            .client
            .execute(Statement::new("DELETE FROM challenges WHERE expires_at <= ?").bind(now))
            .await?;
        Ok(result.rows_affected)
    }
}
