//! Orchestrator shapes consumed from the Docker Engine API.
//!
//! Only the fields agassi reads are modelled; everything else in the
//! API payloads is ignored on deserialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A swarm service as returned by `GET /services` and `/services/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub spec: ServiceSpec,
}

/// `Spec` of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub name: String,
    /// Service-level labels (`deploy.labels` in a stack file).
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub task_template: TaskTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskTemplate {
    #[serde(default)]
    pub container_spec: ContainerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    /// Container-level labels (`labels` in a stack file).
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl ServiceDescriptor {
    /// Upstream hostname: the container hostname if set, else the
    /// service name (swarm DNS resolves both).
    pub fn hostname(&self) -> &str {
        match self.spec.task_template.container_spec.hostname.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => &self.spec.name,
        }
    }

    /// Service labels overlaid with container labels; the container
    /// value wins on key collision.
    pub fn merged_labels(&self) -> HashMap<String, String> {
        let mut labels = self.spec.labels.clone();
        labels.extend(
            self.spec
                .task_template
                .container_spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        labels
    }
}

/// One frame of the `/events` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// What a service event asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Create,
    Update,
    Remove,
}

impl OrchestratorEvent {
    /// The service action carried by this event, if it is one.
    pub fn service_action(&self) -> Option<ServiceAction> {
        if self.kind != "service" {
            return None;
        }
        match self.action.as_str() {
            "create" => Some(ServiceAction::Create),
            "update" => Some(ServiceAction::Update),
            "remove" => Some(ServiceAction::Remove),
            _ => None,
        }
    }
}

/// A network from `GET /networks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkDescriptor {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "IPAM", default)]
    pub ipam: Ipam,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipam {
    #[serde(rename = "Config", default)]
    pub config: Vec<IpamConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    #[serde(rename = "Subnet", default)]
    pub subnet: Option<String>,
}

impl NetworkDescriptor {
    /// The first IPv4 subnet configured for this network.
    pub fn subnet(&self) -> Option<&str> {
        self.ipam
            .config
            .iter()
            .filter_map(|c| c.subnet.as_deref())
            .find(|s| !s.contains(':'))
    }
}
