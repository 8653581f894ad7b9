//! agassi-cluster — self-organizing cluster membership for agassi.
//!
//! Nodes find each other by UDP hello datagrams on the overlay subnet,
//! elect a master among themselves, and decide exactly once how the
//! local replicated store starts: join an existing node, form a new
//! cluster, or run alone.
//!
//! # Architecture
//!
//! ```text
//! Cluster (facade: start / advertise / is_master / stop)
//!   ├── Discovery            UDP hellos, eviction, election
//!   │     ├── PeerSet        shared registry of live peers
//!   │     └── DiscoveryEvent ──mpsc──┐
//!   └── Coordinator  <───────────────┘
//!         ├── backoff search (attempt × 20s, 3 attempts)
//!         ├── one-shot launch: Standalone | Form | Join(addr)
//!         └── ClusterRole (watch, read-only outside)
//! ```

pub mod bootstrap;
pub mod cluster;
pub mod discovery;
pub mod election;
pub mod error;
pub mod peers;
pub mod subnet;
#[cfg(test)]
mod testing;

pub use bootstrap::{BootstrapConfig, BootstrapState, ClusterRole, Coordinator};
pub use cluster::Cluster;
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryEvent, Hello};
pub use error::{ClusterError, ClusterResult};
pub use peers::{Peer, PeerSet};
pub use subnet::Subnet;
