//! Cluster facade — the advertisement API the daemon talks to.

use std::net::IpAddr;
use std::sync::Arc;

use agassi_store::StoreLauncher;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::bootstrap::{BootstrapConfig, ClusterRole, Coordinator};
use crate::discovery::{Discovery, DiscoveryConfig};
use crate::error::{ClusterError, ClusterResult};
use crate::peers::PeerSet;
use crate::subnet::Subnet;

/// Owns discovery and the bootstrap coordinator for one node.
pub struct Cluster<L> {
    discovery: Discovery,
    coordinator: Arc<Coordinator<L>>,
    launcher: Arc<L>,
}

impl<L: StoreLauncher + 'static> Cluster<L> {
    pub fn new(discovery: DiscoveryConfig, bootstrap: BootstrapConfig, launcher: Arc<L>) -> Self {
        let peers = PeerSet::new();
        Self {
            discovery: Discovery::new(discovery, peers.clone()),
            coordinator: Arc::new(Coordinator::new(bootstrap, peers, Arc::clone(&launcher))),
            launcher,
        }
    }

    /// Start the node.
    ///
    /// With `standalone` the store launches immediately and discovery
    /// stays off. Otherwise discovery starts on `subnet` and the
    /// coordinator takes over. The returned task resolves when the
    /// coordinator stops; an error means the store failed.
    pub async fn start(
        &self,
        address: IpAddr,
        subnet: Option<Subnet>,
        standalone: bool,
    ) -> ClusterResult<JoinHandle<ClusterResult<()>>> {
        let coordinator = Arc::clone(&self.coordinator);
        if standalone {
            info!(%address, "discovery disabled, running standalone");
            return Ok(tokio::spawn(async move { coordinator.run_standalone(address).await }));
        }

        let subnet = subnet.ok_or_else(|| ClusterError::InvalidSubnet("no subnet to discover on".to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.discovery.start(address, subnet, events_tx).await?;
        Ok(tokio::spawn(async move { coordinator.run(address, events_rx).await }))
    }

    /// Change the string peers see in our hellos.
    pub fn advertise(&self, tag: impl Into<String>) {
        self.discovery.advertise(tag);
    }

    pub fn is_master(&self) -> bool {
        self.coordinator.current_role() == ClusterRole::Master
    }

    pub fn role(&self) -> watch::Receiver<ClusterRole> {
        self.coordinator.role()
    }

    pub fn peers(&self) -> &PeerSet {
        self.discovery.peers()
    }

    /// Stop discovery and the local store.
    pub async fn stop(&self) {
        self.discovery.stop().await;
        self.launcher.stop();
    }
}
