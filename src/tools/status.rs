// Deployment readiness and pod phase report for `get-status`.

use crate::error::StatusError;
use crate::tools::cluster::Kubectl;
use crate::tools::runner::Runner;
use crate::types::APP_LABEL;
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// The subset of a Deployment object the report reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentObject {
    #[serde(default)]
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub replicas: Option<u32>,
    pub ready_replicas: Option<u32>,
    pub available_replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<PodObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodObject {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: PodStatusObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatusObject {
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Healthy,
    Progressing,
}

impl Health {
    pub fn from_counts(total: u32, ready: u32) -> Self {
        if total > 0 && ready == total {
            Health::Healthy
        } else {
            Health::Progressing
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodReport {
    pub name: String,
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub namespace: String,
    pub health: Health,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub pods: Vec<PodReport>,
}

impl StatusReport {
    pub fn from_objects(name: &str, namespace: &str, deployment: DeploymentObject, pods: PodList) -> Self {
        let total = deployment.status.replicas.unwrap_or(0);
        let ready = deployment.status.ready_replicas.unwrap_or(0);
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            health: Health::from_counts(total, ready),
            replicas: total,
            ready_replicas: ready,
            available_replicas: deployment.status.available_replicas.unwrap_or(0),
            pods: pods
                .items
                .into_iter()
                .map(|pod| PodReport {
                    name: pod.metadata.name,
                    phase: pod.status.phase.unwrap_or_else(|| "Unknown".to_string()),
                })
                .collect(),
        }
    }

    /// Human-readable report, one line per pod.
    pub fn render_text(&self) -> String {
        let health = match self.health {
            Health::Healthy => "Healthy".green(),
            Health::Progressing => "Progressing".yellow(),
        };

        let mut out = String::new();
        out.push_str(&format!("{}\n", format!("--- Deployment Status: {} ---", self.name).bold()));
        out.push_str(&format!("  Namespace: {}\n", self.namespace));
        out.push_str(&format!("  Health:    {}\n", health));
        out.push_str(&format!("  Replicas:  {}/{} Ready\n", self.ready_replicas, self.replicas));
        out.push_str("\n  --- Pods ---\n");
        if self.pods.is_empty() {
            out.push_str("  No pods found for this deployment.\n");
        }
        for pod in &self.pods {
            let phase = match pod.phase.as_str() {
                "Running" => pod.phase.green(),
                "Pending" => pod.phase.yellow(),
                _ => pod.phase.red(),
            };
            out.push_str(&format!("  - {}  (Status: {})\n", pod.name, phase));
        }
        out
    }
}

/// Reads the Deployment and the pods carrying its `app` label.
pub async fn fetch_status<R: Runner>(kubectl: &Kubectl<'_, R>, name: &str, namespace: &str) -> Result<StatusReport, StatusError> {
    let deployment: DeploymentObject = kubectl
        .get_json("deployment", name, namespace)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                StatusError::DeploymentNotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                }
            } else {
                StatusError::Command(e)
            }
        })?;

    let selector = format!("{APP_LABEL}={name}");
    let pods: PodList = kubectl.list_json("pods", namespace, &selector).await?;

    Ok(StatusReport::from_objects(name, namespace, deployment, pods))
}
