//! Service reconciler — keeps the `services` table in step with the
//! orchestrator.
//!
//! Writes are minimal: a new id is inserted, a changed service has only
//! its differing columns updated, an unchanged one costs a single strong
//! read and no write. Removing a service never touches its certificate.

use std::collections::HashSet;

use agassi_store::{Consistency, Repository, ServiceColumn, StoreClient};
use tracing::{debug, info, warn};

use crate::descriptor::{OrchestratorEvent, ServiceAction, ServiceDescriptor};
use crate::docker::Orchestrator;
use crate::error::{ReconcileError, ReconcileResult};
use crate::labels::{self, LabelConfig};

/// What a single reconcile did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted,
    Updated(Vec<ServiceColumn>),
    Unchanged,
}

/// Totals of a full reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Descriptors without a complete label set.
    pub skipped: usize,
    pub removed: usize,
    /// Managed descriptors that failed to reconcile.
    pub failed: usize,
}

/// Applies orchestrator state to the store.
#[derive(Debug, Clone)]
pub struct ServiceReconciler<C> {
    repo: Repository<C>,
    labels: LabelConfig,
}

impl<C: StoreClient> ServiceReconciler<C> {
    pub fn new(repo: Repository<C>, labels: LabelConfig) -> Self {
        Self { repo, labels }
    }

    pub fn labels(&self) -> &LabelConfig {
        &self.labels
    }

    pub fn is_managed_service(&self, descriptor: &ServiceDescriptor) -> bool {
        labels::is_managed_service(&self.labels, descriptor)
    }

    /// Bring the stored record for `descriptor` in line with its labels.
    pub async fn reconcile(&self, descriptor: &ServiceDescriptor) -> ReconcileResult<ReconcileOutcome> {
        let candidate =
            labels::validate(&self.labels, descriptor).map_err(|source| ReconcileError::Validation {
                id: descriptor.id.clone(),
                source,
            })?;

        let stored = self
            .repo
            .get_service(&candidate.id, Consistency::Strong)
            .await?;

        let Some(stored) = stored else {
            let result = self.repo.insert_service(&candidate).await?;
            info!(id = %candidate.id, domain = %candidate.domain, time = ?result.time, "service added");
            return Ok(ReconcileOutcome::Inserted);
        };

        let changed = candidate.diff(&stored);
        if changed.is_empty() {
            debug!(id = %candidate.id, "service unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let result = self.repo.update_service_columns(&candidate, &changed).await?;
        info!(
            id = %candidate.id,
            columns = ?changed.iter().map(|c| c.name()).collect::<Vec<_>>(),
            time = ?result.time,
            "service updated"
        );
        Ok(ReconcileOutcome::Updated(changed))
    }

    /// Delete a service record. Its certificate is left in place.
    pub async fn remove_service(&self, id: &str) -> ReconcileResult<bool> {
        let removed = self.repo.delete_service(id).await?;
        if removed {
            info!(%id, "service removed");
        } else {
            debug!(%id, "service to remove was not stored");
        }
        Ok(removed)
    }

    /// Full pass over everything the orchestrator reports: upsert every
    /// managed service and drop stored ids that are no longer managed.
    ///
    /// Per-service failures are logged and counted; only failing to list
    /// stored ids aborts the pass.
    pub async fn reconcile_all(&self, descriptors: &[ServiceDescriptor]) -> ReconcileResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut managed = HashSet::new();

        for descriptor in descriptors {
            if !self.is_managed_service(descriptor) {
                summary.skipped += 1;
                continue;
            }
            managed.insert(descriptor.id.as_str());
            match self.reconcile(descriptor).await {
                Ok(ReconcileOutcome::Inserted) => summary.inserted += 1,
                Ok(ReconcileOutcome::Updated(_)) => summary.updated += 1,
                Ok(ReconcileOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    warn!(id = %descriptor.id, error = %e, "service reconcile failed");
                    summary.failed += 1;
                }
            }
        }

        for id in self.repo.list_service_ids().await? {
            if managed.contains(id.as_str()) {
                continue;
            }
            match self.remove_service(&id).await {
                Ok(true) => summary.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%id, error = %e, "stale service removal failed");
                    summary.failed += 1;
                }
            }
        }

        info!(?summary, "full service reconciliation done");
        Ok(summary)
    }

    /// Apply one orchestrator event.
    ///
    /// `create`/`update` re-read the service and reconcile it (a service
    /// that lost its labels is removed); `remove` deletes it. Other
    /// events are ignored.
    pub async fn apply_event<O: Orchestrator>(
        &self,
        orchestrator: &O,
        event: &OrchestratorEvent,
    ) -> ReconcileResult<()> {
        let Some(action) = event.service_action() else {
            debug!(kind = %event.kind, action = %event.action, "ignoring orchestrator event");
            return Ok(());
        };
        let id = event.actor.id.as_str();

        match action {
            ServiceAction::Create | ServiceAction::Update => {
                let descriptor = orchestrator.inspect_service(id).await?;
                if self.is_managed_service(&descriptor) {
                    self.reconcile(&descriptor).await?;
                } else if action == ServiceAction::Update {
                    self.remove_service(id).await?;
                }
            }
            ServiceAction::Remove => {
                self.remove_service(id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use agassi_store::schema::create_schema;
    use agassi_store::{CertificateRecord, Protocol, SqliteClient};
    use tokio::sync::mpsc;

    use super::*;
    use crate::descriptor::{Actor, NetworkDescriptor};
    use crate::error::{LabelValidationError, OrchestratorError, OrchestratorResult};

    async fn reconciler() -> (ServiceReconciler<SqliteClient>, SqliteClient) {
        let client = SqliteClient::open_in_memory().unwrap();
        create_schema(&client).await.unwrap();
        (
            ServiceReconciler::new(Repository::new(client.clone()), LabelConfig::default()),
            client,
        )
    }

    fn service(id: &str, labels: &[(&str, &str)]) -> ServiceDescriptor {
        let mut d = ServiceDescriptor {
            id: id.to_string(),
            ..Default::default()
        };
        d.spec.name = format!("stack_{id}");
        d.spec.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        d
    }

    fn web(id: &str, port: &str) -> ServiceDescriptor {
        service(
            id,
            &[
                ("agassi.protocol", "http"),
                ("agassi.domain", "a.example.com"),
                ("agassi.port", port),
            ],
        )
    }

    #[derive(Default)]
    struct FakeOrchestrator {
        services: Mutex<HashMap<String, ServiceDescriptor>>,
    }

    impl FakeOrchestrator {
        fn put(&self, descriptor: ServiceDescriptor) {
            self.services
                .lock()
                .unwrap()
                .insert(descriptor.id.clone(), descriptor);
        }
    }

    impl Orchestrator for FakeOrchestrator {
        async fn list_services(&self) -> OrchestratorResult<Vec<ServiceDescriptor>> {
            Ok(self.services.lock().unwrap().values().cloned().collect())
        }

        async fn inspect_service(&self, id: &str) -> OrchestratorResult<ServiceDescriptor> {
            self.services
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(OrchestratorError::Status {
                    status: 404,
                    body: "service not found".to_string(),
                })
        }

        async fn list_networks(&self) -> OrchestratorResult<Vec<NetworkDescriptor>> {
            Ok(Vec::new())
        }

        async fn events(&self, _tx: mpsc::UnboundedSender<OrchestratorEvent>) -> OrchestratorResult<()> {
            Ok(())
        }
    }

    fn event(action: &str, id: &str) -> OrchestratorEvent {
        OrchestratorEvent {
            kind: "service".to_string(),
            action: action.to_string(),
            actor: Actor { id: id.to_string() },
        }
    }

    #[tokio::test]
    async fn inserts_then_is_idempotent() {
        let (reconciler, client) = reconciler().await;
        let svc = web("s1", "80");

        assert_eq!(reconciler.reconcile(&svc).await.unwrap(), ReconcileOutcome::Inserted);
        let writes = client.writes();

        assert_eq!(reconciler.reconcile(&svc).await.unwrap(), ReconcileOutcome::Unchanged);
        assert_eq!(client.writes(), writes);
    }

    #[tokio::test]
    async fn updates_only_changed_columns() {
        let (reconciler, _client) = reconciler().await;
        reconciler.reconcile(&web("s1", "80")).await.unwrap();

        let outcome = reconciler.reconcile(&web("s1", "8080")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(vec![ServiceColumn::Port]));

        let stored = reconciler
            .repo
            .get_service("s1", Consistency::Strong)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.port, Some(8080));
        assert_eq!(stored.protocol, Some(Protocol::Http));
    }

    #[tokio::test]
    async fn partial_labels_are_a_validation_error() {
        let (reconciler, client) = reconciler().await;
        let partial = service("s1", &[("agassi.domain", "a.example.com"), ("agassi.port", "80")]);
        let writes = client.writes();

        let err = reconciler.reconcile(&partial).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Validation { source: LabelValidationError::MissingLabels(ref m), .. }
                if m == &vec!["protocol".to_string()]
        ));
        assert_eq!(client.writes(), writes);
    }

    #[tokio::test]
    async fn removal_keeps_certificates() {
        let (reconciler, _client) = reconciler().await;
        reconciler.reconcile(&web("s1", "80")).await.unwrap();
        reconciler
            .repo
            .put_certificate(&CertificateRecord {
                domain: "a.example.com".to_string(),
                fingerprint: "ab".to_string(),
                cert_pem: "cert".to_string(),
                key_pem: "key".to_string(),
                issued_at: 1,
            })
            .await
            .unwrap();

        assert!(reconciler.remove_service("s1").await.unwrap());
        assert!(!reconciler.remove_service("s1").await.unwrap());
        assert!(
            reconciler
                .repo
                .get_certificate("a.example.com")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn full_pass_upserts_and_prunes() {
        let (reconciler, _client) = reconciler().await;
        reconciler.reconcile(&web("gone", "80")).await.unwrap();
        reconciler.reconcile(&web("kept", "80")).await.unwrap();

        let descriptors = vec![
            web("kept", "81"),
            web("new", "80"),
            service("plain", &[("com.example.team", "ops")]),
        ];
        let summary = reconciler.reconcile_all(&descriptors).await.unwrap();

        assert_eq!(
            summary,
            ReconcileSummary {
                inserted: 1,
                updated: 1,
                unchanged: 0,
                skipped: 1,
                removed: 1,
                failed: 0,
            }
        );
        let mut ids = reconciler.repo.list_service_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["kept".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn events_drive_reconciliation() {
        let (reconciler, _client) = reconciler().await;
        let orchestrator = FakeOrchestrator::default();
        orchestrator.put(web("s1", "80"));

        reconciler.apply_event(&orchestrator, &event("create", "s1")).await.unwrap();
        assert_eq!(reconciler.repo.list_service_ids().await.unwrap(), vec!["s1"]);

        // Labels stripped on update: the service stops being routed.
        orchestrator.put(service("s1", &[]));
        reconciler.apply_event(&orchestrator, &event("update", "s1")).await.unwrap();
        assert!(reconciler.repo.list_service_ids().await.unwrap().is_empty());

        orchestrator.put(web("s2", "80"));
        reconciler.apply_event(&orchestrator, &event("update", "s2")).await.unwrap();
        reconciler.apply_event(&orchestrator, &event("remove", "s2")).await.unwrap();
        assert!(reconciler.repo.list_service_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_events_are_ignored() {
        let (reconciler, client) = reconciler().await;
        let orchestrator = FakeOrchestrator::default();
        let writes = client.writes();

        let container = OrchestratorEvent {
            kind: "container".to_string(),
            ..event("create", "c1")
        };
        reconciler.apply_event(&orchestrator, &container).await.unwrap();
        reconciler.apply_event(&orchestrator, &event("rollback", "s1")).await.unwrap();
        assert_eq!(client.writes(), writes);
    }

    #[tokio::test]
    async fn vanished_service_on_create_surfaces_orchestrator_error() {
        let (reconciler, _client) = reconciler().await;
        let orchestrator = FakeOrchestrator::default();
        let err = reconciler
            .apply_event(&orchestrator, &event("create", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Orchestrator(_)));
    }
}
