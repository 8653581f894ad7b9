//! Orchestrator follower.
//!
//! While active, streams service events from the orchestrator into the
//! reconciler. Every activation (first connect, resume after a store
//! disconnect, stream reconnect) starts with a full reconciliation.

use std::time::Duration;

use agassi_store::StoreClient;
use agassi_swarm::{Orchestrator, ServiceReconciler};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Delay before reopening a closed event stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wait until `rx` holds `value`. False when the sender is gone.
async fn until(rx: &mut watch::Receiver<bool>, value: bool) -> bool {
    rx.wait_for(|v| *v == value).await.is_ok()
}

/// Follow the orchestrator until shutdown.
///
/// `active` gates all store writes: events arriving while inactive are
/// dropped, and the next activation catches up with a full pass. Returns
/// on shutdown or once the gate's sender is gone.
pub async fn follow<C, O>(
    reconciler: ServiceReconciler<C>,
    orchestrator: O,
    mut active: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: StoreClient,
    O: Orchestrator + Clone + 'static,
{
    loop {
        tokio::select! {
            open = until(&mut active, true) => {
                if !open {
                    return;
                }
            }
            _ = until(&mut shutdown, true) => return,
        }

        let (tx, mut events) = mpsc::unbounded_channel();
        let stream = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.events(tx).await })
        };

        match orchestrator.list_services().await {
            Ok(services) => {
                if let Err(e) = reconciler.reconcile_all(&services).await {
                    warn!(error = %e, "full reconciliation failed");
                }
            }
            Err(e) => warn!(error = %e, "listing services failed"),
        }

        let closed = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        debug!(kind = %event.kind, action = %event.action, id = %event.actor.id, "orchestrator event");
                        if let Err(e) = reconciler.apply_event(&orchestrator, &event).await {
                            warn!(id = %event.actor.id, error = %e, "event reconcile failed");
                        }
                    }
                    None => break true,
                },
                open = until(&mut active, false) => {
                    if !open {
                        stream.abort();
                        return;
                    }
                    info!("reconciliation paused");
                    break false;
                }
                _ = until(&mut shutdown, true) => {
                    stream.abort();
                    return;
                }
            }
        };

        if !closed {
            stream.abort();
            continue;
        }
        match stream.await {
            Ok(Err(e)) => warn!(error = %e, "orchestrator event stream failed"),
            _ => warn!("orchestrator event stream closed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = until(&mut shutdown, true) => return,
        }
    }
}
