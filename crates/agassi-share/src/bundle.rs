//! Certificate bundles and their fingerprints.

use agassi_store::{CertificateRecord, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A certificate chain and its private key for one domain, as exchanged
/// between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at: Timestamp,
}

impl CertificateBundle {
    /// Hex SHA-256 over certificate then key. Identifies this exact
    /// pair: a renewal always changes it.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.cert_pem, &self.key_pem)
    }

    /// Whether this bundle is the one `hash` names.
    pub fn matches(&self, hash: &str) -> bool {
        self.fingerprint().eq_ignore_ascii_case(hash)
    }

    pub fn to_record(&self) -> CertificateRecord {
        CertificateRecord {
            domain: self.domain.clone(),
            fingerprint: self.fingerprint(),
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
            issued_at: self.issued_at,
        }
    }
}

impl From<CertificateRecord> for CertificateBundle {
    fn from(record: CertificateRecord) -> Self {
        Self {
            domain: record.domain,
            cert_pem: record.cert_pem,
            key_pem: record.key_pem,
            issued_at: record.issued_at,
        }
    }
}

pub fn fingerprint(cert_pem: &str, key_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_pem.as_bytes());
    hasher.update(key_pem.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(cert: &str) -> CertificateBundle {
        CertificateBundle {
            domain: "a.example.com".to_string(),
            cert_pem: cert.to_string(),
            key_pem: "key".to_string(),
            issued_at: 10,
        }
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = bundle("cert").fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint("cert", "key"));
    }

    #[test]
    fn renewal_changes_fingerprint() {
        assert_ne!(bundle("cert-1").fingerprint(), bundle("cert-2").fingerprint());
    }

    #[test]
    fn matches_ignores_case() {
        let b = bundle("cert");
        assert!(b.matches(&b.fingerprint().to_uppercase()));
        assert!(!b.matches("00"));
    }

    #[test]
    fn record_conversion_keeps_fingerprint() {
        let b = bundle("cert");
        let record = b.to_record();
        assert_eq!(record.fingerprint, b.fingerprint());
        assert_eq!(CertificateBundle::from(record), b);
    }
}
