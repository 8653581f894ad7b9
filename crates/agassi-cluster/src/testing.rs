//! Test doubles shared by the coordinator and facade tests.

use std::net::IpAddr;
use std::sync::Mutex;

use agassi_store::{LaunchPlan, StoreError, StoreHandle, StoreLauncher, StoreResult};
use tokio::sync::oneshot;

/// Records every launch and hands out handles the test can crash.
#[derive(Default)]
pub struct RecordingLauncher {
    plans: Mutex<Vec<LaunchPlan>>,
    exits: Mutex<Vec<oneshot::Sender<String>>>,
    stops: Mutex<usize>,
    fail: bool,
}

impl RecordingLauncher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn plans(&self) -> Vec<LaunchPlan> {
        self.plans.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock().unwrap()
    }

    /// Make every launched store exit with `reason`.
    pub fn crash(&self, reason: &str) {
        for tx in self.exits.lock().unwrap().drain(..) {
            let _ = tx.send(reason.to_string());
        }
    }
}

impl StoreLauncher for RecordingLauncher {
    async fn launch(&self, _listen: IpAddr, plan: LaunchPlan) -> StoreResult<StoreHandle> {
        self.plans.lock().unwrap().push(plan);
        if self.fail {
            return Err(StoreError::Launch("rqlited not found".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().push(tx);
        Ok(StoreHandle::new(rx))
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
        self.exits.lock().unwrap().clear();
    }
}
