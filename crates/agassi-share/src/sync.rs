//! Certificate sync protocol — converges the local cache with peers.
//!
//! `sync_all` runs one round:
//!
//! 1. Ask every peer for its inventory in parallel (2s each). Peers that
//!    fail are left out of this round.
//! 2. `needed` = every advertised fingerprint whose domain is missing
//!    locally or held under a different fingerprint.
//! 3. Pull from peers ranked by inventory size, largest first, asking
//!    each only for what is still needed.
//! 4. Whatever is left is reported as unresolved; the next round retries.
//!
//! A pulled bundle older than the one already held is kept out of the
//! cache, and its fingerprint is not asked for again while peers still
//! advertise it.
//!
//! `push` hands a new certificate to every peer, best effort. `pull`
//! fetches specific fingerprints from one round-robin peer, racing the
//! rest if that peer fails.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agassi_cluster::PeerSet;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bundle::CertificateBundle;
use crate::cache::{CertificateCache, Inventory};
use crate::error::{ShareError, ShareResult};
use crate::transport::{Bundles, PeerTransport};

/// Per-exchange deadlines.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub inventory_timeout: Duration,
    /// Deadline for each pull during a sync round.
    pub fetch_timeout: Duration,
    /// Deadline for the round-robin primary in `pull`.
    pub pull_timeout: Duration,
    /// Deadline for the fan-out race after the primary fails.
    pub race_timeout: Duration,
    pub push_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            inventory_timeout: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(2),
            pull_timeout: Duration::from_secs(1),
            race_timeout: Duration::from_secs(2),
            push_timeout: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    pub fn with_inventory_timeout(mut self, timeout: Duration) -> Self {
        self.inventory_timeout = timeout;
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }
}

/// Outcome of one `sync_all` round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_asked: usize,
    pub peers_answered: usize,
    /// Domains whose certificate was pulled this round.
    pub pulled: Vec<String>,
    /// Domains still missing after every answering peer was tried.
    pub unresolved: Vec<String>,
}

/// Outcome of a `push`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Drives certificate sync for this node.
#[derive(Clone)]
pub struct CertSync<T> {
    transport: T,
    peers: PeerSet,
    cache: CertificateCache,
    config: SyncConfig,
    next_primary: Arc<AtomicUsize>,
    /// Fingerprints pulled but superseded by a newer local bundle.
    superseded: Arc<Mutex<BTreeSet<String>>>,
}

impl<T: PeerTransport> CertSync<T> {
    pub fn new(transport: T, peers: PeerSet, cache: CertificateCache, config: SyncConfig) -> Self {
        Self {
            transport,
            peers,
            cache,
            config,
            next_primary: Arc::new(AtomicUsize::new(0)),
            superseded: Arc::default(),
        }
    }

    pub fn cache(&self) -> &CertificateCache {
        &self.cache
    }

    /// Run one sync round against all known peers.
    pub async fn sync_all(&self) -> SyncReport {
        let peers: Vec<IpAddr> = self.peers.all().into_iter().map(|p| p.address).collect();
        let mut report = SyncReport {
            peers_asked: peers.len(),
            ..Default::default()
        };
        if peers.is_empty() {
            debug!("no peers to sync certificates with");
            return report;
        }

        let mut inventories = self.collect_inventories(&peers).await;
        report.peers_answered = inventories.len();

        let local = self.cache.inventory();
        let mut needed: BTreeMap<String, String> = {
            let mut superseded = self.superseded.lock().expect("superseded lock");
            superseded.retain(|fp| {
                inventories
                    .iter()
                    .any(|(_, _, inventory)| inventory.values().any(|v| v == fp))
            });
            // fingerprint → domain
            inventories
                .iter()
                .flat_map(|(_, _, inventory)| inventory.iter())
                .filter(|(domain, fp)| local.get(*domain) != Some(*fp) && !superseded.contains(*fp))
                .map(|(domain, fp)| (fp.clone(), domain.clone()))
                .collect()
        };
        if needed.is_empty() {
            debug!(peers = report.peers_answered, "certificates already in sync");
            return report;
        }

        // Largest inventory first; peer-set order breaks ties.
        inventories.sort_by(|a, b| b.2.len().cmp(&a.2.len()).then(a.0.cmp(&b.0)));

        for (_, peer, inventory) in &inventories {
            if needed.is_empty() {
                break;
            }
            let wanted: Vec<String> = inventory
                .values()
                .filter(|fp| needed.contains_key(*fp))
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if wanted.is_empty() {
                continue;
            }

            let fetched = tokio::time::timeout(
                self.config.fetch_timeout,
                self.transport.fetch_certs(*peer, wanted.clone()),
            )
            .await;
            let bundles = match fetched {
                Ok(Ok(bundles)) => bundles,
                Ok(Err(e)) => {
                    warn!(%peer, error = %e, "certificate pull failed");
                    continue;
                }
                Err(_) => {
                    warn!(%peer, after = ?self.config.fetch_timeout, "certificate pull timed out");
                    continue;
                }
            };

            for (hash, bundle) in self.accept(*peer, &wanted, bundles) {
                needed.remove(&hash);
                let domain = bundle.domain.clone();
                if self.cache.insert(bundle) {
                    report.pulled.push(domain);
                } else {
                    debug!(%peer, %domain, "kept newer certificate");
                    self.superseded.lock().expect("superseded lock").insert(hash);
                }
            }
        }

        report.unresolved = needed.into_values().collect::<BTreeSet<_>>().into_iter().collect();
        if report.unresolved.is_empty() {
            info!(pulled = report.pulled.len(), "certificate sync complete");
        } else {
            warn!(
                pulled = report.pulled.len(),
                unresolved = ?report.unresolved,
                "certificate sync left needs unresolved"
            );
        }
        report
    }

    /// Send a new or renewed certificate to every peer. Individual
    /// failures are logged, never returned.
    pub async fn push(&self, bundle: CertificateBundle) -> PushReport {
        self.cache.insert(bundle.clone());

        let mut tasks = JoinSet::new();
        let payload = Bundles::from([(bundle.fingerprint(), bundle.clone())]);
        for peer in self.peers.all() {
            let transport = self.transport.clone();
            let payload = payload.clone();
            let timeout = self.config.push_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, transport.push(peer.address, payload))
                    .await
                    .unwrap_or(Err(ShareError::Timeout {
                        peer: peer.address,
                        after: timeout,
                    }));
                (peer.address, result)
            });
        }

        let mut report = PushReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((peer, Err(e))) => {
                    warn!(%peer, domain = %bundle.domain, error = %e, "certificate push failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "certificate push task failed");
                    report.failed += 1;
                }
            }
        }
        debug!(domain = %bundle.domain, ?report, "certificate pushed");
        report
    }

    /// Fetch specific fingerprints right now.
    ///
    /// Asks one peer picked round-robin; if it fails or has none of them,
    /// asks all the others at once and takes the first useful answer.
    /// Verified bundles also land in the cache.
    pub async fn pull(&self, hashes: &[String]) -> ShareResult<Vec<CertificateBundle>> {
        let peers: Vec<IpAddr> = self.peers.all().into_iter().map(|p| p.address).collect();
        if peers.is_empty() {
            return Err(ShareError::NoPeers);
        }

        let primary = peers[self.next_primary.fetch_add(1, Ordering::Relaxed) % peers.len()];
        match tokio::time::timeout(
            self.config.pull_timeout,
            self.transport.fetch_certs(primary, hashes.to_vec()),
        )
        .await
        {
            Ok(Ok(bundles)) => {
                let accepted = self.accept(primary, hashes, bundles);
                if !accepted.is_empty() {
                    return Ok(self.store(accepted));
                }
                debug!(peer = %primary, "primary had none of the requested certificates");
            }
            Ok(Err(e)) => debug!(peer = %primary, error = %e, "primary pull failed"),
            Err(_) => debug!(peer = %primary, "primary pull timed out"),
        }

        let mut race = JoinSet::new();
        for peer in peers.into_iter().filter(|p| *p != primary) {
            let transport = self.transport.clone();
            let wanted = hashes.to_vec();
            let timeout = self.config.race_timeout;
            race.spawn(async move {
                let result = tokio::time::timeout(timeout, transport.fetch_certs(peer, wanted))
                    .await
                    .unwrap_or(Err(ShareError::Timeout { peer, after: timeout }));
                (peer, result)
            });
        }

        while let Some(joined) = race.join_next().await {
            let Ok((peer, result)) = joined else { continue };
            match result {
                Ok(bundles) => {
                    let accepted = self.accept(peer, hashes, bundles);
                    if !accepted.is_empty() {
                        race.abort_all();
                        return Ok(self.store(accepted));
                    }
                }
                Err(e) => debug!(%peer, error = %e, "racing pull failed"),
            }
        }

        warn!(hashes = hashes.len(), "no peer could supply requested certificates");
        Err(ShareError::Exhausted)
    }

    async fn collect_inventories(&self, peers: &[IpAddr]) -> Vec<(usize, IpAddr, Inventory)> {
        let mut tasks = JoinSet::new();
        for (index, peer) in peers.iter().copied().enumerate() {
            let transport = self.transport.clone();
            let timeout = self.config.inventory_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, transport.fetch_inventory(peer))
                    .await
                    .unwrap_or(Err(ShareError::Timeout { peer, after: timeout }));
                (index, peer, result)
            });
        }

        let mut inventories = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, peer, Ok(inventory))) => inventories.push((index, peer, inventory)),
                Ok((_, peer, Err(e))) => warn!(%peer, error = %e, "peer left out of sync round"),
                Err(e) => warn!(error = %e, "inventory task failed"),
            }
        }
        inventories
    }

    /// Keep only requested bundles whose content matches their hash.
    fn accept(&self, peer: IpAddr, wanted: &[String], bundles: Bundles) -> Vec<(String, CertificateBundle)> {
        bundles
            .into_iter()
            .filter(|(hash, bundle)| {
                if !wanted.iter().any(|w| w.eq_ignore_ascii_case(hash)) {
                    debug!(%peer, %hash, "ignoring unrequested certificate");
                    return false;
                }
                if !bundle.matches(hash) {
                    let err = ShareError::FingerprintMismatch {
                        domain: bundle.domain.clone(),
                        expected: hash.clone(),
                    };
                    warn!(%peer, error = %err, "discarding certificate");
                    return false;
                }
                true
            })
            .collect()
    }

    fn store(&self, accepted: Vec<(String, CertificateBundle)>) -> Vec<CertificateBundle> {
        accepted
            .into_iter()
            .map(|(_, bundle)| {
                self.cache.insert(bundle.clone());
                bundle
            })
            .collect()
    }
}
