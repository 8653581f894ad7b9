//! Command-line and environment configuration.
//!
//! Every option can also be set through an `AGASSI_*` environment
//! variable, which is how swarm deployments configure the daemon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use agassi_cluster::{BootstrapConfig, DiscoveryConfig};
use agassi_share::SyncConfig;
use agassi_store::RqlitedConfig;
use agassi_swarm::LabelConfig;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "agassid", about = "agassi cluster daemon")]
pub struct Config {
    /// Address to advertise and bind. Detected from the overlay network when omitted.
    #[arg(long, env = "AGASSI_ADDRESS")]
    pub address: Option<IpAddr>,

    /// Stable node id. Defaults to the advertised address.
    #[arg(long, env = "AGASSI_NODE_ID")]
    pub node_id: Option<String>,

    /// Skip discovery and run a single-node store.
    #[arg(long, env = "AGASSI_STANDALONE")]
    pub standalone: bool,

    #[arg(long, env = "AGASSI_DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    /// Prefix of the service labels agassi reads.
    #[arg(long, env = "AGASSI_LABEL_PREFIX", default_value = "agassi.")]
    pub label_prefix: String,

    #[arg(long, env = "AGASSI_LABEL_SEPARATOR", default_value = ".")]
    pub label_separator: String,

    /// Label key identifying the overlay network.
    #[arg(long, env = "AGASSI_NETWORK_LABEL_KEY")]
    pub network_label_key: Option<String>,

    #[arg(long, env = "AGASSI_NETWORK_LABEL_VALUE")]
    pub network_label_value: Option<String>,

    /// UDP port for discovery hellos.
    #[arg(long, env = "AGASSI_DISCOVERY_PORT", default_value = "4002")]
    pub discovery_port: u16,

    /// Seconds without a hello before a peer is dropped.
    #[arg(long, env = "AGASSI_NODE_TIMEOUT", default_value = "10")]
    pub node_timeout: u64,

    /// Port for the peer certificate endpoints.
    #[arg(long, env = "AGASSI_SHARE_PORT", default_value = "8081")]
    pub share_port: u16,

    /// Port for ACME challenges and the HTTPS redirect.
    #[arg(long, env = "AGASSI_HTTP_PORT", default_value = "80")]
    pub http_port: u16,

    #[arg(long, env = "AGASSI_STORE_HTTP_PORT", default_value = "4001")]
    pub store_http_port: u16,

    #[arg(long, env = "AGASSI_STORE_RAFT_PORT", default_value = "4003")]
    pub store_raft_port: u16,

    #[arg(long, env = "AGASSI_DATA_DIR", default_value = "/var/lib/agassi")]
    pub data_dir: PathBuf,

    /// Path to the rqlited binary.
    #[arg(long, env = "AGASSI_RQLITED", default_value = "rqlited")]
    pub rqlited: PathBuf,

    /// Seconds between certificate sync rounds.
    #[arg(long, env = "AGASSI_SYNC_INTERVAL", default_value = "60")]
    pub sync_interval: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "AGASSI_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// The node id, falling back to the advertised address.
    pub fn node_id(&self, address: IpAddr) -> String {
        self.node_id.clone().unwrap_or_else(|| address.to_string())
    }

    /// The overlay network label, when both halves are set.
    pub fn network_label(&self) -> Option<(&str, &str)> {
        match (&self.network_label_key, &self.network_label_value) {
            (Some(key), Some(value)) => Some((key, value)),
            _ => None,
        }
    }

    pub fn discovery(&self, node_id: &str) -> DiscoveryConfig {
        DiscoveryConfig::default()
            .with_node_id(node_id)
            .with_port(self.discovery_port)
            .with_node_timeout(Duration::from_secs(self.node_timeout))
    }

    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig::default()
    }

    pub fn labels(&self) -> LabelConfig {
        LabelConfig::default()
            .with_prefix(self.label_prefix.clone())
            .with_separator(self.label_separator.clone())
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig::default()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval.max(1))
    }

    pub fn rqlited(&self, node_id: &str) -> RqlitedConfig {
        RqlitedConfig {
            binary: self.rqlited.clone(),
            data_dir: self.data_dir.join("rqlite"),
            node_id: node_id.to_string(),
            http_port: self.store_http_port,
            raft_port: self.store_raft_port,
        }
    }

    /// HTTP API address of the local store.
    pub fn store_addr(&self, address: IpAddr) -> String {
        format!("{address}:{}", self.store_http_port)
    }

    /// Public listener for ACME challenges and redirects.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.http_port)
    }

    /// Share endpoints, reachable on the overlay address only.
    pub fn share_addr(&self, address: IpAddr) -> SocketAddr {
        SocketAddr::new(address, self.share_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["agassid"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.discovery_port, 4002);
        assert_eq!(config.share_port, 8081);
        assert_eq!(config.http_port, 80);
        assert_eq!(config.store_http_port, 4001);
        assert_eq!(config.store_raft_port, 4003);
        assert_eq!(config.label_prefix, "agassi.");
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert!(!config.standalone);
        assert!(config.network_label().is_none());
    }

    #[test]
    fn node_id_falls_back_to_address() {
        let address = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(parse(&[]).node_id(address), "10.0.0.7");
        assert_eq!(parse(&["--node-id", "edge-1"]).node_id(address), "edge-1");
    }

    #[test]
    fn component_configs_follow_flags() {
        let config = parse(&[
            "--discovery-port",
            "5002",
            "--node-timeout",
            "30",
            "--store-raft-port",
            "5003",
            "--data-dir",
            "/data",
            "--network-label-key",
            "agassi.network",
            "--network-label-value",
            "overlay",
        ]);
        let address = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

        let discovery = config.discovery("n1");
        assert_eq!(discovery.port, 5002);
        assert_eq!(discovery.node_timeout, Duration::from_secs(30));
        assert_eq!(discovery.node_id, "n1");

        let rqlited = config.rqlited("n1");
        assert_eq!(rqlited.raft_port, 5003);
        assert_eq!(rqlited.data_dir, PathBuf::from("/data/rqlite"));

        assert_eq!(config.network_label(), Some(("agassi.network", "overlay")));
        assert_eq!(config.store_addr(address), "10.0.0.7:4001");
    }

    #[test]
    fn share_listener_stays_on_the_overlay() {
        let config = parse(&["--share-port", "9081", "--http-port", "8080"]);
        let address = IpAddr::V4(Ipv4Addr::new(10, 0, 9, 5));
        assert_eq!(config.share_addr(address).to_string(), "10.0.9.5:9081");
        assert_eq!(config.http_addr().to_string(), "0.0.0.0:8080");
    }
}
