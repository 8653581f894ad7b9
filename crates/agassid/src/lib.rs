//! agassid — the agassi daemon.
//!
//! One process per swarm node. It assembles:
//! - Discovery and store bootstrap (agassi-cluster)
//! - The replicated store and its readiness monitor (agassi-store)
//! - Service reconciliation from the Docker event stream (agassi-swarm)
//! - Certificate sync and the peer share endpoints (agassi-share)
//! - The plain-HTTP listener for ACME challenges and HTTPS redirects
//!
//! # Usage
//!
//! ```text
//! agassid --network-label-key agassi.network --network-label-value overlay
//! agassid --standalone --address 10.0.0.2
//! ```

pub mod challenge;
pub mod config;
pub mod follow;
pub mod node;

pub use config::Config;
pub use node::{locate, run, warm_cache};
