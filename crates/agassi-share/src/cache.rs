//! Local certificate inventory with SNI resolution.
//!
//! The cache is what this node can serve and what it advertises to
//! peers. One bundle per domain; a newer bundle replaces an older one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::bundle::CertificateBundle;

/// domain → fingerprint.
pub type Inventory = BTreeMap<String, String>;

/// Shared, thread-safe certificate store keyed by domain.
#[derive(Debug, Clone, Default)]
pub struct CertificateCache {
    certs: Arc<RwLock<HashMap<String, CertificateBundle>>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bundle. Returns false (and keeps the current one) if the
    /// domain already holds this exact bundle or a more recently issued
    /// one.
    pub fn insert(&self, bundle: CertificateBundle) -> bool {
        let mut certs = self.certs.write().expect("cert cache lock");
        if let Some(current) = certs.get(&bundle.domain)
            && (current.issued_at > bundle.issued_at || current == &bundle)
        {
            return false;
        }
        debug!(domain = %bundle.domain, issued_at = bundle.issued_at, "certificate cached");
        certs.insert(bundle.domain.clone(), bundle);
        true
    }

    pub fn remove(&self, domain: &str) -> Option<CertificateBundle> {
        self.certs.write().expect("cert cache lock").remove(domain)
    }

    pub fn get(&self, domain: &str) -> Option<CertificateBundle> {
        self.certs.read().expect("cert cache lock").get(domain).cloned()
    }

    /// Resolve the bundle for an SNI server name: exact domain first,
    /// then a single-label wildcard (`*.example.com` covers
    /// `api.example.com` but not `a.b.example.com`).
    pub fn resolve(&self, server_name: &str) -> Option<CertificateBundle> {
        let certs = self.certs.read().expect("cert cache lock");
        if let Some(bundle) = certs.get(server_name) {
            return Some(bundle.clone());
        }
        let (_, parent) = server_name.split_once('.')?;
        certs.get(&format!("*.{parent}")).cloned()
    }

    /// What this node holds, as advertised on `/certs/list`.
    pub fn inventory(&self) -> Inventory {
        let certs = self.certs.read().expect("cert cache lock");
        certs
            .iter()
            .map(|(domain, bundle)| (domain.clone(), bundle.fingerprint()))
            .collect()
    }

    /// Bundles whose fingerprint is one of `hashes`, keyed by fingerprint.
    pub fn by_fingerprints<S: AsRef<str>>(&self, hashes: &[S]) -> BTreeMap<String, CertificateBundle> {
        let certs = self.certs.read().expect("cert cache lock");
        certs
            .values()
            .filter_map(|bundle| {
                let fp = bundle.fingerprint();
                hashes
                    .iter()
                    .any(|h| h.as_ref().eq_ignore_ascii_case(&fp))
                    .then(|| (fp, bundle.clone()))
            })
            .collect()
    }

    pub fn domains(&self) -> Vec<String> {
        let certs = self.certs.read().expect("cert cache lock");
        certs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.certs.read().expect("cert cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(domain: &str, cert: &str, issued_at: u64) -> CertificateBundle {
        CertificateBundle {
            domain: domain.to_string(),
            cert_pem: cert.to_string(),
            key_pem: format!("key-{domain}"),
            issued_at,
        }
    }

    #[test]
    fn exact_match() {
        let cache = CertificateCache::new();
        cache.insert(bundle("api.example.com", "c", 1));
        assert_eq!(cache.resolve("api.example.com").unwrap().cert_pem, "c");
        assert!(cache.resolve("www.example.com").is_none());
    }

    #[test]
    fn wildcard_covers_one_label() {
        let cache = CertificateCache::new();
        cache.insert(bundle("*.example.com", "wild", 1));
        assert_eq!(cache.resolve("api.example.com").unwrap().domain, "*.example.com");
        assert!(cache.resolve("sub.api.example.com").is_none());
        assert!(cache.resolve("example.com").is_none());
    }

    #[test]
    fn exact_beats_wildcard() {
        let cache = CertificateCache::new();
        cache.insert(bundle("*.example.com", "wild", 1));
        cache.insert(bundle("api.example.com", "exact", 1));
        assert_eq!(cache.resolve("api.example.com").unwrap().cert_pem, "exact");
    }

    #[test]
    fn newer_bundle_replaces_older() {
        let cache = CertificateCache::new();
        assert!(cache.insert(bundle("a.com", "v1", 10)));
        assert!(cache.insert(bundle("a.com", "v2", 20)));
        assert!(!cache.insert(bundle("a.com", "v1", 10)));
        assert!(!cache.insert(bundle("a.com", "v2", 20)));
        assert_eq!(cache.get("a.com").unwrap().cert_pem, "v2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn inventory_and_lookup_by_fingerprint() {
        let cache = CertificateCache::new();
        let a = bundle("a.com", "ca", 1);
        let b = bundle("b.com", "cb", 1);
        cache.insert(a.clone());
        cache.insert(b.clone());

        let inventory = cache.inventory();
        assert_eq!(inventory["a.com"], a.fingerprint());
        assert_eq!(inventory["b.com"], b.fingerprint());

        let found = cache.by_fingerprints(&[a.fingerprint(), "feed".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[&a.fingerprint()], a);
    }
}
