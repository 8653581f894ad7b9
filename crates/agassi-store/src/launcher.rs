//! Store process launcher.
//!
//! The bootstrap coordinator decides *how* the local store starts
//! (alone, forming a new cluster, or joining an existing node); the
//! launcher turns that decision into a running `rqlited` process and
//! reports if it dies.

use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use crate::error::{StoreError, StoreResult};

/// How the local store process should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPlan {
    /// Discovery disabled: single node, no cluster.
    Standalone,
    /// No peer to join: bootstrap a new cluster.
    Form,
    /// Join the cluster reachable through this peer.
    Join(IpAddr),
}

/// A running store process.
///
/// Resolves `exited()` with a reason if the process dies on its own.
/// A deliberate stop resolves with `None`.
#[derive(Debug)]
pub struct StoreHandle {
    exit: Option<oneshot::Receiver<String>>,
}

impl StoreHandle {
    /// Build a handle from an exit-reason receiver.
    pub fn new(exit: oneshot::Receiver<String>) -> Self {
        Self { exit: Some(exit) }
    }

    /// Whether the process has not been observed to exit yet.
    pub fn is_running(&self) -> bool {
        self.exit.is_some()
    }

    /// Wait for the process to exit. Returns immediately with `None`
    /// once an exit has already been observed.
    pub async fn exited(&mut self) -> Option<String> {
        let rx = self.exit.as_mut()?;
        let reason = rx.await.ok();
        self.exit = None;
        reason
    }
}

/// Starts and stops the local store process.
pub trait StoreLauncher: Send + Sync {
    /// Start the store listening on `listen` according to `plan`.
    fn launch(
        &self,
        listen: IpAddr,
        plan: LaunchPlan,
    ) -> impl Future<Output = StoreResult<StoreHandle>> + Send;

    /// Stop the store. Safe to call when nothing was launched.
    fn stop(&self);
}

/// Configuration for spawning `rqlited`.
#[derive(Debug, Clone)]
pub struct RqlitedConfig {
    /// Path to the `rqlited` binary.
    pub binary: PathBuf,
    /// Data directory for the Raft log and SQLite file.
    pub data_dir: PathBuf,
    /// Stable node id.
    pub node_id: String,
    pub http_port: u16,
    pub raft_port: u16,
}

impl Default for RqlitedConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rqlited"),
            data_dir: PathBuf::from("/var/lib/agassi/rqlite"),
            node_id: "agassi".to_string(),
            http_port: 4001,
            raft_port: 4003,
        }
    }
}

impl RqlitedConfig {
    /// Command-line arguments for the given plan.
    pub fn args(&self, listen: IpAddr, plan: LaunchPlan) -> Vec<String> {
        let mut args = vec![
            "-node-id".to_string(),
            self.node_id.clone(),
            "-http-addr".to_string(),
            format!("0.0.0.0:{}", self.http_port),
            "-http-adv-addr".to_string(),
            format!("{listen}:{}", self.http_port),
            "-raft-addr".to_string(),
            format!("0.0.0.0:{}", self.raft_port),
            "-raft-adv-addr".to_string(),
            format!("{listen}:{}", self.raft_port),
        ];
        if let LaunchPlan::Join(target) = plan {
            args.push("-join".to_string());
            args.push(format!("{target}:{}", self.raft_port));
        }
        args.push(self.data_dir.display().to_string());
        args
    }
}

/// Spawns `rqlited` as a child process.
pub struct RqlitedLauncher {
    config: RqlitedConfig,
    kill: watch::Sender<bool>,
}

impl RqlitedLauncher {
    pub fn new(config: RqlitedConfig) -> Self {
        let (kill, _) = watch::channel(false);
        Self { config, kill }
    }

    pub fn config(&self) -> &RqlitedConfig {
        &self.config
    }
}

impl StoreLauncher for RqlitedLauncher {
    async fn launch(&self, listen: IpAddr, plan: LaunchPlan) -> StoreResult<StoreHandle> {
        std::fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| StoreError::Launch(format!("create {:?}: {e}", self.config.data_dir)))?;

        let args = self.config.args(listen, plan);
        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoreError::Launch(format!("spawn {:?}: {e}", self.config.binary)))?;

        info!(?plan, %listen, pid = ?child.id(), "rqlited started");

        let (exit_tx, exit_rx) = oneshot::channel();
        let mut kill = self.kill.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let reason = match status {
                        Ok(status) => format!("rqlited exited with {status}"),
                        Err(e) => format!("rqlited wait failed: {e}"),
                    };
                    error!(%reason, "store process exited unexpectedly");
                    let _ = exit_tx.send(reason);
                }
                // The guard from `wait_for` must not live across `kill().await`.
                _ = async { let _ = kill.wait_for(|killed| *killed).await; } => {
                    info!("stopping rqlited");
                    let _ = child.kill().await;
                }
            }
        });

        Ok(StoreHandle::new(exit_rx))
    }

    fn stop(&self) {
        self.kill.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn listen() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    #[test]
    fn join_plan_adds_join_flag() {
        let config = RqlitedConfig::default();
        let args = config.args(listen(), LaunchPlan::Join(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        let pos = args.iter().position(|a| a == "-join").unwrap();
        assert_eq!(args[pos + 1], "10.0.0.2:4003");
        assert_eq!(args.last().unwrap(), "/var/lib/agassi/rqlite");
    }

    #[test]
    fn form_and_standalone_have_no_join() {
        let config = RqlitedConfig::default();
        for plan in [LaunchPlan::Form, LaunchPlan::Standalone] {
            let args = config.args(listen(), plan);
            assert!(!args.iter().any(|a| a == "-join"));
            assert!(args.contains(&"10.0.0.5:4001".to_string()));
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let dir = std::env::temp_dir().join("agassi-launcher-test");
        let launcher = RqlitedLauncher::new(RqlitedConfig {
            binary: PathBuf::from("/nonexistent/rqlited"),
            data_dir: dir,
            ..RqlitedConfig::default()
        });
        let err = launcher.launch(listen(), LaunchPlan::Form).await.unwrap_err();
        assert!(matches!(err, StoreError::Launch(_)));
        // Stopping without a running process is harmless.
        launcher.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_a_running_store_quietly() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = std::env::temp_dir().join(format!("agassi-launcher-stop-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join("fake-rqlited");
        std::fs::write(&binary, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let launcher = RqlitedLauncher::new(RqlitedConfig {
            binary,
            data_dir: dir.join("data"),
            ..RqlitedConfig::default()
        });
        let mut handle = launcher.launch(listen(), LaunchPlan::Form).await.unwrap();
        assert!(handle.is_running());

        launcher.stop();
        let reason = tokio::time::timeout(Duration::from_secs(5), handle.exited())
            .await
            .expect("store stops promptly");
        assert_eq!(reason, None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dropped_sender_means_deliberate_stop() {
        let (tx, rx) = oneshot::channel::<String>();
        let mut handle = StoreHandle::new(rx);
        drop(tx);
        assert_eq!(handle.exited().await, None);
        assert!(!handle.is_running());
        assert_eq!(handle.exited().await, None);
    }
}
