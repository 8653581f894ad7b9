//! Record types held in the replicated store.
//!
//! `ServiceRecord` is a materialized copy of what the orchestrator reports;
//! `CertificateRecord` and `ChallengeRecord` belong to the certificate
//! pipeline. `ServiceRecord.domain` ↔ `CertificateRecord.domain` is a soft
//! link: a service may exist before its certificate does.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Row;
use crate::error::{StoreError, StoreResult};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// The current wall-clock time as a `Timestamp`.
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ── Service ───────────────────────────────────────────────────────

/// Upstream protocol a routed service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(other.to_string()),
        }
    }
}

/// A routed service, keyed by the orchestrator-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub domain: String,
    pub protocol: Option<Protocol>,
    pub hostname: String,
    pub port: Option<u16>,
    pub auth: Option<String>,
    /// Proxy options passed through from labels.
    pub options: BTreeMap<String, String>,
}

/// Mutable columns of the `services` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceColumn {
    Domain,
    Protocol,
    Hostname,
    Port,
    Auth,
    Options,
}

impl ServiceColumn {
    pub const ALL: [ServiceColumn; 6] = [
        ServiceColumn::Domain,
        ServiceColumn::Protocol,
        ServiceColumn::Hostname,
        ServiceColumn::Port,
        ServiceColumn::Auth,
        ServiceColumn::Options,
    ];

    /// Column name in the `services` table.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceColumn::Domain => "domain",
            ServiceColumn::Protocol => "protocol",
            ServiceColumn::Hostname => "hostname",
            ServiceColumn::Port => "port",
            ServiceColumn::Auth => "auth",
            ServiceColumn::Options => "options",
        }
    }

    /// The value this column holds for `record`, in its stored form.
    pub fn value(&self, record: &ServiceRecord) -> Value {
        match self {
            ServiceColumn::Domain => record.domain.clone().into(),
            ServiceColumn::Protocol => record.protocol.map(|p| p.as_str()).into(),
            ServiceColumn::Hostname => record.hostname.clone().into(),
            ServiceColumn::Port => record.port.into(),
            ServiceColumn::Auth => record.auth.clone().into(),
            ServiceColumn::Options => record.options_json().into(),
        }
    }

    fn differs(&self, a: &ServiceRecord, b: &ServiceRecord) -> bool {
        match self {
            ServiceColumn::Domain => a.domain != b.domain,
            ServiceColumn::Protocol => a.protocol != b.protocol,
            ServiceColumn::Hostname => a.hostname != b.hostname,
            ServiceColumn::Port => a.port != b.port,
            ServiceColumn::Auth => a.auth != b.auth,
            ServiceColumn::Options => a.options != b.options,
        }
    }
}

impl ServiceRecord {
    /// Columns whose value in `self` differs from `stored`.
    pub fn diff(&self, stored: &ServiceRecord) -> Vec<ServiceColumn> {
        ServiceColumn::ALL
            .into_iter()
            .filter(|column| column.differs(self, stored))
            .collect()
    }

    pub fn options_json(&self) -> String {
        // A string-keyed map of strings always serializes.
        serde_json::to_string(&self.options).unwrap_or_else(|_| "{}".to_string())
    }

    /// Decode a row of the `services` table.
    pub fn from_row(row: &Row) -> StoreResult<Self> {
        let protocol = match opt_text(row, "protocol")? {
            Some(p) => Some(
                p.parse::<Protocol>()
                    .map_err(|p| StoreError::Decode(format!("unknown protocol {p:?}")))?,
            ),
            None => None,
        };
        let port = match opt_integer(row, "port")? {
            Some(p) => Some(
                u16::try_from(p).map_err(|_| StoreError::Decode(format!("port {p} out of range")))?,
            ),
            None => None,
        };
        let options = match opt_text(row, "options")? {
            Some(json) if !json.is_empty() => serde_json::from_str(&json)
                .map_err(|e| StoreError::Decode(format!("options: {e}")))?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            id: text(row, "id")?,
            domain: text(row, "domain")?,
            protocol,
            hostname: opt_text(row, "hostname")?.unwrap_or_default(),
            port,
            auth: opt_text(row, "auth")?,
            options,
        })
    }
}

// ── Certificate ───────────────────────────────────────────────────

/// An issued certificate and its key, one per domain.
///
/// Never mutated in place: renewal replaces the record with a new
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub domain: String,
    /// Hex SHA-256 over certificate + key.
    pub fingerprint: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at: Timestamp,
}

impl CertificateRecord {
    pub fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            domain: text(row, "domain")?,
            fingerprint: text(row, "fingerprint")?,
            cert_pem: text(row, "cert_pem")?,
            key_pem: text(row, "key_pem")?,
            issued_at: opt_integer(row, "issued_at")?.unwrap_or_default() as Timestamp,
        })
    }
}

// ── Challenge ─────────────────────────────────────────────────────

/// A pending ACME HTTP-01 challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub token: String,
    pub response: String,
    pub domain: String,
    pub acme_order_id: String,
    pub expires_at: Timestamp,
}

impl ChallengeRecord {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            token: text(row, "token")?,
            response: text(row, "response")?,
            domain: text(row, "domain")?,
            acme_order_id: opt_text(row, "acme_order")?.unwrap_or_default(),
            expires_at: opt_integer(row, "expires_at")?.unwrap_or_default() as Timestamp,
        })
    }
}

// ── Row decoding ──────────────────────────────────────────────────

fn text(row: &Row, column: &str) -> StoreResult<String> {
    opt_text(row, column)?.ok_or_else(|| StoreError::Decode(format!("column {column} is null")))
}

fn opt_text(row: &Row, column: &str) -> StoreResult<Option<String>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StoreError::Decode(format!(
            "column {column}: expected text, got {other}"
        ))),
    }
}

fn opt_integer(row: &Row, column: &str) -> StoreResult<Option<i64>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| StoreError::Decode(format!("column {column}: not an integer"))),
        // SQLite's type affinity can hand back numeric text.
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("column {column}: {e}"))),
        Some(other) => Err(StoreError::Decode(format!(
            "column {column}: expected integer, got {other}"
        ))),
    }
}
