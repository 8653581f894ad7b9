//! agassi-swarm — orchestrator integration for agassi.
//!
//! Reads swarm services and their labels from the Docker Engine API and
//! materializes the labelled ones as `ServiceRecord`s in the replicated
//! store.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (trait)
//!   └── DockerClient     /services, /networks, /events over the unix socket
//!
//! ServiceReconciler<C: StoreClient>
//!   ├── labels           merge, classify, options, validate → ServiceRecord
//!   ├── reconcile        insert | update differing columns | no-op
//!   ├── reconcile_all    full pass on connect, prunes stale ids
//!   └── apply_event      create/update → reconcile, remove → delete
//! ```

pub mod descriptor;
pub mod docker;
pub mod error;
pub mod labels;
pub mod reconciler;

pub use descriptor::{
    Actor, ContainerSpec, Ipam, IpamConfig, NetworkDescriptor, OrchestratorEvent, ServiceAction,
    ServiceDescriptor, ServiceSpec, TaskTemplate,
};
pub use docker::{DockerClient, Orchestrator, find_network};
pub use error::{
    LabelValidationError, OrchestratorError, OrchestratorResult, ReconcileError, ReconcileResult,
};
pub use labels::{LabelConfig, Management, ServiceLabels, is_managed_service, validate};
pub use reconciler::{ReconcileOutcome, ReconcileSummary, ServiceReconciler};
