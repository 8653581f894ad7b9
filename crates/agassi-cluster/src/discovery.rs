//! Discovery engine — UDP hello broadcast, peer eviction, and election.
//!
//! Every `hello_interval` the engine sends a JSON `Hello` to each target
//! on the subnet (a unicast sweep for small subnets, the broadcast
//! address otherwise). Incoming hellos populate the shared `PeerSet`;
//! every `check_interval` peers silent for longer than `node_timeout`
//! are evicted and the election rule is re-evaluated.
//!
//! Socket errors never stop the engine: they are logged and the next
//! tick tries again.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::election::{self, Rank, Verdict};
use crate::error::{ClusterError, ClusterResult};
use crate::peers::{Peer, PeerSet};
use crate::subnet::Subnet;

/// Membership and election events, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(Peer),
    Removed(Peer),
    /// This node became master.
    Promoted,
    /// This node stopped being master.
    Demoted,
}

/// The datagram every node broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub node_id: String,
    pub address: IpAddr,
    pub started_at: u64,
    pub is_master: bool,
    #[serde(default)]
    pub advertisement: Option<String>,
}

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Node id sent in hellos; datagrams carrying our own id are ignored.
    pub node_id: String,
    /// Process start time (Unix millis), the primary election rank.
    pub started_at: u64,
    /// Local address to bind the UDP socket to.
    pub bind_ip: IpAddr,
    /// UDP port, shared by all nodes.
    pub port: u16,
    pub hello_interval: Duration,
    pub check_interval: Duration,
    /// Silence after which a peer is evicted.
    pub node_timeout: Duration,
    /// Subnets with more hosts than this use the broadcast address
    /// instead of a unicast sweep.
    pub max_unicast_hosts: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            node_id: format!("agassi-{}", std::process::id()),
            started_at: epoch_millis(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4002,
            hello_interval: Duration::from_secs(1),
            check_interval: Duration::from_secs(2),
            node_timeout: Duration::from_secs(10),
            max_unicast_hosts: 1024,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_started_at(mut self, started_at: u64) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Hello destinations for a subnet, excluding `local`.
    pub fn targets_for(&self, subnet: &Subnet, local: IpAddr) -> Vec<SocketAddr> {
        if subnet.host_count() > self.max_unicast_hosts {
            return vec![SocketAddr::new(IpAddr::V4(subnet.broadcast()), self.port)];
        }
        subnet
            .hosts()
            .map(IpAddr::V4)
            .filter(|ip| *ip != local)
            .map(|ip| SocketAddr::new(ip, self.port))
            .collect()
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Long-lived discovery handle.
///
/// `start` spawns the engine task; `stop` tears it down and releases the
/// socket. `advertise` changes the string carried in hellos without
/// touching membership.
pub struct Discovery {
    config: DiscoveryConfig,
    peers: PeerSet,
    advertisement: watch::Sender<Option<String>>,
    is_master: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, peers: PeerSet) -> Self {
        let (advertisement, _) = watch::channel(None);
        Self {
            config,
            peers,
            advertisement,
            is_master: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Whether the discovery substrate currently considers us master.
    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().expect("discovery lock").is_some()
    }

    /// Change the advertisement carried by subsequent hellos.
    pub fn advertise(&self, tag: impl Into<String>) {
        let tag = tag.into();
        debug!(%tag, "discovery advertisement set");
        self.advertisement.send_replace(Some(tag));
    }

    /// Start discovery on `subnet`, announcing `address`.
    pub async fn start(
        &self,
        address: IpAddr,
        subnet: Subnet,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> ClusterResult<()> {
        let targets = self.config.targets_for(&subnet, address);
        info!(%address, %subnet, targets = targets.len(), "starting discovery");
        self.start_with_targets(address, targets, events).await
    }

    /// Start discovery sending hellos to an explicit target list.
    pub async fn start_with_targets(
        &self,
        address: IpAddr,
        targets: Vec<SocketAddr>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> ClusterResult<()> {
        if self.is_running() {
            return Err(ClusterError::AlreadyStarted);
        }

        let socket = UdpSocket::bind((self.config.bind_ip, self.config.port)).await?;
        socket.set_broadcast(true)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let engine = Engine {
            config: self.config.clone(),
            local: Rank {
                started_at: self.config.started_at,
                address,
            },
            socket,
            targets,
            peers: self.peers.clone(),
            advertisement: self.advertisement.subscribe(),
            is_master: Arc::clone(&self.is_master),
            events,
        };

        let mut running = self.running.lock().expect("discovery lock");
        if running.is_some() {
            return Err(ClusterError::AlreadyStarted);
        }
        let handle = tokio::spawn(engine.run(shutdown_rx));
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Stop discovery. Safe to call when not started.
    ///
    /// Returns once the engine has exited and its socket is closed, so the
    /// port can be bound again straight away.
    pub async fn stop(&self) {
        let running = self.running.lock().expect("discovery lock").take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                warn!(error = %e, "discovery engine ended abnormally");
            }
            self.is_master.store(false, Ordering::SeqCst);
            info!("discovery stopped");
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().ok().and_then(Option::take) {
            running.handle.abort();
        }
    }
}

struct Engine {
    config: DiscoveryConfig,
    local: Rank,
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    peers: PeerSet,
    advertisement: watch::Receiver<Option<String>>,
    is_master: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl Engine {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut hello_tick = tokio::time::interval(self.config.hello_interval);
        // The first check waits a full interval so hellos already in
        // flight are heard before anyone promotes itself.
        let mut check_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.check_interval,
            self.config.check_interval,
        );
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                _ = hello_tick.tick() => self.send_hellos().await,
                _ = check_tick.tick() => self.check(),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.receive(&buf[..len], from),
                    Err(e) => warn!(error = %e, "discovery receive failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("discovery engine exited");
    }

    async fn send_hellos(&self) {
        let hello = Hello {
            node_id: self.config.node_id.clone(),
            address: self.local.address,
            started_at: self.local.started_at,
            is_master: self.is_master.load(Ordering::SeqCst),
            advertisement: self.advertisement.borrow().clone(),
        };
        let payload = match serde_json::to_vec(&hello) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode hello");
                return;
            }
        };

        let mut failures = 0usize;
        for target in &self.targets {
            if let Err(e) = self.socket.send_to(&payload, target).await {
                debug!(%target, error = %e, "hello send failed");
                failures += 1;
            }
        }
        if failures > 0 && failures == self.targets.len() {
            warn!(failures, "no hello could be sent this tick");
        }
    }

    fn receive(&self, datagram: &[u8], from: SocketAddr) {
        let hello: Hello = match serde_json::from_slice(datagram) {
            Ok(h) => h,
            Err(e) => {
                debug!(%from, error = %e, "ignoring malformed hello");
                return;
            }
        };
        if hello.node_id == self.config.node_id {
            return;
        }

        let peer = Peer {
            address: hello.address,
            node_id: hello.node_id,
            started_at: hello.started_at,
            is_master: hello.is_master,
            advertisement: hello.advertisement,
            last_seen: Instant::now(),
        };
        if self.peers.upsert(peer.clone()) {
            info!(address = %peer.address, node_id = %peer.node_id, "found cluster peer");
            self.emit(DiscoveryEvent::Added(peer));
        }
    }

    fn check(&mut self) {
        for peer in self.peers.evict_stale(self.config.node_timeout, Instant::now()) {
            info!(address = %peer.address, node_id = %peer.node_id, "lost cluster peer");
            self.emit(DiscoveryEvent::Removed(peer));
        }

        let was_master = self.is_master.load(Ordering::SeqCst);
        match election::decide(self.local, was_master, &self.peers.all()) {
            Verdict::Promote => {
                self.is_master.store(true, Ordering::SeqCst);
                info!(address = %self.local.address, "promoted to master");
                self.emit(DiscoveryEvent::Promoted);
            }
            Verdict::Demote => {
                self.is_master.store(false, Ordering::SeqCst);
                info!(address = %self.local.address, "demoted from master");
                self.emit(DiscoveryEvent::Demoted);
            }
            Verdict::Hold => {}
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        if self.events.send(event).is_err() {
            debug!("discovery event receiver dropped");
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
