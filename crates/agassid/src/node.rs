//! Node assembly.
//!
//! Locates this node on the overlay network, starts discovery and the
//! store bootstrap, then reacts to store readiness:
//!
//! - `Ready`: the store leader creates the schema, the node advertises
//!   `ready`, the HTTP listener starts, the certificate cache is warmed
//!   from the store, and reconciliation is switched on.
//! - `Disconnected`: reconciliation is paused.
//! - `Reconnected`: reconciliation resumes and the node advertises
//!   `reconnected`.
//!
//! Certificate sync and the share endpoints run for the whole life of
//! the node.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use agassi_cluster::{Cluster, ClusterRole, Subnet};
use agassi_share::{CertSync, CertificateBundle, CertificateCache, HttpTransport, PeerTransport};
use agassi_store::{
    Repository, RqliteClient, RqlitedLauncher, StatusMonitor, StoreClient, StoreResult, StoreSignal,
    schema, unix_now,
};
use agassi_swarm::{DockerClient, Orchestrator, ServiceReconciler, find_network};
use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::challenge;
use crate::config::Config;
use crate::follow::follow;

/// Leadership refresh and challenge purge cadence.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Run the daemon until Ctrl-C or the store dies.
pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("agassi daemon starting");

    let docker = DockerClient::new(&config.docker_socket);
    let (address, subnet) = locate(&config, &docker).await?;
    let node_id = config.node_id(address);
    info!(
        %address,
        %node_id,
        subnet = ?subnet.as_ref().map(ToString::to_string),
        standalone = config.standalone,
        "node located"
    );

    // ── Shutdown signal ─────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (active_tx, active_rx) = watch::channel(false);

    let launcher = Arc::new(RqlitedLauncher::new(config.rqlited(&node_id)));
    let cluster = Cluster::new(config.discovery(&node_id), config.bootstrap(), launcher);

    // ── Share endpoints ─────────────────────────────────────────

    // Private keys are served here: overlay address only.
    let cache = CertificateCache::new();
    let share = serve(
        "share",
        config.share_addr(address),
        agassi_share::server::router(cache.clone(), cluster.peers().clone()),
        shutdown_rx.clone(),
    )
    .await?;

    // ── Cluster ─────────────────────────────────────────────────

    let mut coordinator = cluster.start(address, subnet, config.standalone).await?;

    // ── Store status ────────────────────────────────────────────

    let store = RqliteClient::new(config.store_addr(address));
    let repo = Repository::new(store.clone());
    let (signals_tx, mut signals) = mpsc::unbounded_channel();
    let monitor = tokio::spawn(StatusMonitor::new(store.clone()).run(signals_tx, shutdown_rx.clone()));

    // ── Certificate sync ────────────────────────────────────────

    let sync = CertSync::new(
        HttpTransport::new(config.share_port),
        cluster.peers().clone(),
        cache.clone(),
        config.sync(),
    );
    let syncing = tokio::spawn(sync_loop(sync, config.sync_interval(), shutdown_rx.clone()));

    // ── Orchestrator follower ───────────────────────────────────

    let reconciler = ServiceReconciler::new(repo.clone(), config.labels());
    let follower = tokio::spawn(follow(reconciler, docker, active_rx, shutdown_rx.clone()));

    // ── Main loop ───────────────────────────────────────────────

    let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut http = None;
    let mut store_up = false;

    let result = loop {
        tokio::select! {
            Some(signal) = signals.recv() => match signal {
                StoreSignal::Ready => {
                    store_up = true;
                    let leader = is_leader(&store).await;
                    if let Err(e) = prepare_store(&repo, &cache, leader).await {
                        break Err(e);
                    }
                    cluster.advertise("ready");
                    match serve("http", config.http_addr(), challenge::router(repo.clone()), shutdown_rx.clone()).await {
                        Ok(handle) => http = Some(handle),
                        Err(e) => break Err(e),
                    }
                    active_tx.send_replace(leader);
                }
                StoreSignal::Disconnected => {
                    store_up = false;
                    active_tx.send_replace(false);
                }
                StoreSignal::Reconnected => {
                    store_up = true;
                    active_tx.send_replace(is_leader(&store).await);
                    cluster.advertise("reconnected");
                }
            },
            _ = housekeeping.tick(), if store_up => {
                let leader = is_leader(&store).await;
                active_tx.send_if_modified(|active| std::mem::replace(active, leader) != leader);
                let role = *cluster.role().borrow();
                if matches!(role, ClusterRole::Master | ClusterRole::Standalone) {
                    match repo.purge_expired_challenges(unix_now()).await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "expired challenges removed"),
                        Err(e) => warn!(error = %e, "challenge purge failed"),
                    }
                }
            }
            joined = &mut coordinator => {
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::Error::new(e).context("cluster bootstrap")),
                    Err(e) => Err(anyhow::Error::new(e).context("bootstrap task")),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break Ok(());
            }
        }
    };

    // ── Shutdown ────────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    cluster.stop().await;
    let _ = monitor.await;
    let _ = syncing.await;
    let _ = follower.await;
    let _ = share.await;
    if let Some(http) = http {
        let _ = http.await;
    }

    match &result {
        Ok(()) => info!("agassi daemon stopped"),
        Err(e) => error!(error = %format!("{e:#}"), "agassi daemon failed"),
    }
    result
}

/// Find this node's address and the subnet to discover peers on.
///
/// The subnet comes from the overlay network labelled with the
/// configured key/value. An explicit `--address` wins over detection.
pub async fn locate<O: Orchestrator>(
    config: &Config,
    orchestrator: &O,
) -> anyhow::Result<(IpAddr, Option<Subnet>)> {
    let subnet = match config.network_label() {
        Some((key, value)) => {
            let network = find_network(orchestrator, key, value).await?;
            let cidr = network
                .subnet()
                .with_context(|| format!("network {} has no IPv4 subnet", network.name))?;
            Some(cidr.parse::<Subnet>()?)
        }
        None => None,
    };

    let address = match (config.address, &subnet) {
        (Some(address), _) => address,
        (None, Some(subnet)) => subnet
            .local_address()
            .with_context(|| format!("no local address inside {subnet}"))?,
        (None, None) => {
            anyhow::bail!("no address: pass --address or --network-label-key/--network-label-value")
        }
    };
    Ok((address, subnet))
}

/// First-ready work against the store. Only the leader creates the
/// schema; a cold cache is not fatal.
async fn prepare_store<C: StoreClient>(
    repo: &Repository<C>,
    cache: &CertificateCache,
    leader: bool,
) -> anyhow::Result<()> {
    if leader {
        schema::create_schema(repo.client())
            .await
            .context("creating store schema")?;
        info!("store schema ready");
    }
    match warm_cache(repo, cache).await {
        Ok(loaded) => info!(loaded, "certificate cache warmed"),
        Err(e) => warn!(error = %e, "could not load certificates from store"),
    }
    Ok(())
}

/// Load every stored certificate into the cache. Records whose
/// fingerprint does not match their content are skipped. Returns how
/// many bundles were added.
pub async fn warm_cache<C: StoreClient>(
    repo: &Repository<C>,
    cache: &CertificateCache,
) -> StoreResult<usize> {
    let mut loaded = 0;
    for record in repo.list_certificates().await? {
        let expected = record.fingerprint.clone();
        let bundle = CertificateBundle::from(record);
        if !bundle.matches(&expected) {
            warn!(domain = %bundle.domain, "stored certificate does not match its fingerprint");
            continue;
        }
        if cache.insert(bundle) {
            loaded += 1;
        }
    }
    Ok(loaded)
}

async fn is_leader(store: &RqliteClient) -> bool {
    match store.is_leader().await {
        Ok(leader) => leader,
        Err(e) => {
            warn!(error = %e, "could not read store leadership");
            false
        }
    }
}

/// Bind `addr` and serve `router` until shutdown. Handlers can extract
/// the peer's `ConnectInfo<SocketAddr>`.
async fn serve(
    name: &'static str,
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {name} listener on {addr}"))?;
    info!(%addr, server = name, "listener started");

    Ok(tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(e) = server.await {
            error!(server = name, error = %e, "listener failed");
        }
        info!(server = name, "listener stopped");
    }))
}

/// Run `sync_all` every `every` until shutdown.
pub async fn sync_loop<T: PeerTransport>(
    sync: CertSync<T>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sync.sync_all().await;
                if !report.pulled.is_empty() {
                    info!(pulled = ?report.pulled, "certificates synced from peers");
                }
                debug!(asked = report.peers_asked, answered = report.peers_answered, "sync round done");
            }
            _ = shutdown.changed() => return,
        }
    }
}
