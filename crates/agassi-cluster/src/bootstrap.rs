//! Bootstrap coordinator — turns discovery events into exactly one store
//! launch and tracks this node's `ClusterRole`.
//!
//! While `Searching`, the coordinator re-checks the peer set after
//! `attempt × backoff_unit` for attempts 1..=retries. Peers found means
//! join the master (or form a cluster if none is flagged); no peers after
//! the last attempt means form alone. A peer advertising `ready` or
//! `reconnected` short-circuits the timer.
//!
//! Events are handled one at a time from a single channel, so role
//! transitions are serialized. The launch itself is guarded by a
//! one-shot latch: later events only flip the role.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use agassi_store::{LaunchPlan, StoreHandle, StoreLauncher};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::discovery::DiscoveryEvent;
use crate::error::{ClusterError, ClusterResult};
use crate::peers::PeerSet;

/// Advertisements that mark a peer whose store is up and joinable.
const JOINABLE: [&str; 2] = ["ready", "reconnected"];

/// This node's place in the cluster.
///
/// `Standalone` only comes from running with discovery disabled, or from
/// forming alone before discovery promoted us. A lone node with discovery
/// on promotes itself at its first election check, well inside the search
/// backoff, so it reports `Master` while `BootstrapState` reads
/// `Standalone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    Unknown,
    Standalone,
    Member,
    Master,
}

/// Progress of the store bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Searching,
    Joining(IpAddr),
    Running,
    Standalone,
    Failed,
}

/// Backoff tuning for the peer search.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Number of search attempts before forming alone.
    pub retries: u32,
    /// Attempt `n` waits `n × backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_unit: Duration::from_secs(20),
        }
    }
}

impl BootstrapConfig {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }
}

/// Owns the bootstrap decision and the cluster role.
pub struct Coordinator<L> {
    config: BootstrapConfig,
    peers: PeerSet,
    launcher: Arc<L>,
    role: watch::Sender<ClusterRole>,
    state: watch::Sender<BootstrapState>,
    launched: OnceLock<LaunchPlan>,
}

impl<L: StoreLauncher> Coordinator<L> {
    pub fn new(config: BootstrapConfig, peers: PeerSet, launcher: Arc<L>) -> Self {
        let (role, _) = watch::channel(ClusterRole::Unknown);
        let (state, _) = watch::channel(BootstrapState::Searching);
        Self {
            config,
            peers,
            launcher,
            role,
            state,
            launched: OnceLock::new(),
        }
    }

    /// Read-only view of the role; changes are observable via `changed()`.
    pub fn role(&self) -> watch::Receiver<ClusterRole> {
        self.role.subscribe()
    }

    pub fn current_role(&self) -> ClusterRole {
        *self.role.borrow()
    }

    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    /// The plan the store was launched with, once it has been.
    pub fn launched(&self) -> Option<LaunchPlan> {
        self.launched.get().copied()
    }

    /// Drive the bootstrap from discovery events until the event channel
    /// closes (clean stop) or the store dies.
    pub async fn run(
        &self,
        address: IpAddr,
        mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) -> ClusterResult<()> {
        let mut attempt = 1u32;
        let mut deadline = Instant::now() + self.config.backoff_unit * attempt;
        let mut store: Option<StoreHandle> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline), if self.launched.get().is_none() => {
                    if !self.peers.is_empty() {
                        let plan = match self.peers.master_peer() {
                            Some(master) => LaunchPlan::Join(master.address),
                            None => LaunchPlan::Form,
                        };
                        store = self.launch(address, plan).await?.or(store);
                    } else if attempt < self.config.retries {
                        attempt += 1;
                        deadline = Instant::now() + self.config.backoff_unit * attempt;
                        debug!(attempt, wait = ?(self.config.backoff_unit * attempt), "no peers yet");
                    } else {
                        warn!(attempts = attempt, "could not find any peers, forming a cluster alone");
                        store = self.launch(address, LaunchPlan::Form).await?.or(store);
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("discovery event channel closed");
                        return Ok(());
                    };
                    if let Some(plan) = self.on_event(event) {
                        store = self.launch(address, plan).await?.or(store);
                    }
                }
                Some(reason) = store_exit(&mut store) => {
                    self.state.send_replace(BootstrapState::Failed);
                    error!(%reason, "store process exited");
                    return Err(ClusterError::StoreExited(reason));
                }
            }
        }
    }

    /// Launch the store alone with discovery disabled and wait for it.
    pub async fn run_standalone(&self, address: IpAddr) -> ClusterResult<()> {
        let Some(mut store) = self.launch(address, LaunchPlan::Standalone).await? else {
            return Ok(());
        };
        match store.exited().await {
            Some(reason) => {
                self.state.send_replace(BootstrapState::Failed);
                error!(%reason, "store process exited");
                Err(ClusterError::StoreExited(reason))
            }
            None => Ok(()),
        }
    }

    /// Apply one discovery event. Returns a plan if it should trigger
    /// the bootstrap right away.
    fn on_event(&self, event: DiscoveryEvent) -> Option<LaunchPlan> {
        match event {
            DiscoveryEvent::Added(peer) => {
                let joinable = peer
                    .advertisement
                    .as_deref()
                    .is_some_and(|tag| JOINABLE.contains(&tag));
                if joinable && self.state() == BootstrapState::Searching {
                    info!(address = %peer.address, "found a running peer, joining it");
                    return Some(LaunchPlan::Join(peer.address));
                }
                None
            }
            DiscoveryEvent::Removed(peer) => {
                debug!(address = %peer.address, "peer left");
                None
            }
            DiscoveryEvent::Promoted => {
                if self.state() != BootstrapState::Failed {
                    self.set_role(ClusterRole::Master);
                }
                None
            }
            DiscoveryEvent::Demoted => {
                if self.current_role() == ClusterRole::Master {
                    self.set_role(ClusterRole::Member);
                }
                None
            }
        }
    }

    /// Launch the store with `plan` unless a launch already happened.
    async fn launch(&self, address: IpAddr, plan: LaunchPlan) -> ClusterResult<Option<StoreHandle>> {
        if self.launched.set(plan).is_err() {
            debug!(?plan, "store already launched, ignoring");
            return Ok(None);
        }

        if let LaunchPlan::Join(target) = plan {
            self.state.send_replace(BootstrapState::Joining(target));
        }
        info!(?plan, %address, "bootstrapping store");

        let handle = match self.launcher.launch(address, plan).await {
            Ok(handle) => handle,
            Err(e) => {
                self.state.send_replace(BootstrapState::Failed);
                error!(error = %e, ?plan, "store launch failed");
                return Err(e.into());
            }
        };

        let (state, role) = match plan {
            LaunchPlan::Standalone => (BootstrapState::Standalone, ClusterRole::Standalone),
            LaunchPlan::Form if self.peers.is_empty() => {
                (BootstrapState::Standalone, ClusterRole::Standalone)
            }
            LaunchPlan::Form | LaunchPlan::Join(_) => (BootstrapState::Running, ClusterRole::Member),
        };
        self.state.send_replace(state);
        // Promotion may already have landed while searching.
        if self.current_role() == ClusterRole::Unknown {
            self.set_role(role);
        }
        Ok(Some(handle))
    }

    fn set_role(&self, role: ClusterRole) {
        let changed = self.role.send_if_modified(|current| {
            if *current == role {
                return false;
            }
            let from = *current;
            info!(?from, to = ?role, "cluster role changed");
            *current = role;
            true
        });
        if !changed {
            debug!(?role, "cluster role unchanged");
        }
    }
}

/// Resolves when a launched store exits; pending while none runs.
async fn store_exit(store: &mut Option<StoreHandle>) -> Option<String> {
    match store {
        Some(handle) if handle.is_running() => handle.exited().await,
        _ => std::future::pending().await,
    }
}
