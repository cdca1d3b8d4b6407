// Values-file types (parsed YAML) and the validated specs the renderer consumes.
// Parsing keeps every field optional so validation can name what is missing.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedValues {
    pub name: Option<String>,
    pub image: Option<String>,
    pub namespace: Option<String>,
    pub replicas: Option<u32>,
    pub command: Option<Vec<String>>,
    pub port: Option<u16>,
    pub cpu_request: Option<String>,
    pub mem_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub mem_limit: Option<String>,
    pub scaling: Option<ParsedScaling>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedScaling {
    pub trigger_type: Option<String>,
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
    /// Values stay untyped here so non-strings can be rejected by key.
    pub trigger_metadata: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// A validated values document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub name: String,
    pub image: String,
    pub namespace: String,
    pub replicas: u32,
    pub command: Option<Vec<String>>,
    pub port: u16,
    pub resources: ResourceSpec,
    pub scaling: Option<ScalingSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub cpu_request: String,
    pub mem_request: String,
    pub cpu_limit: String,
    pub mem_limit: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu_request: DEFAULT_CPU_REQUEST.to_string(),
            mem_request: DEFAULT_MEM_REQUEST.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT.to_string(),
            mem_limit: DEFAULT_MEM_LIMIT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingSpec {
    pub trigger_type: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Trigger-type specific keys (`bootstrapServers`, `topic`, ...), copied as-is.
    pub trigger_metadata: BTreeMap<String, String>,
}

pub const DEPLOYMENT_API_VERSION: &str = "apps/v1";
pub const DEPLOYMENT_KIND: &str = "Deployment";
pub const SCALED_OBJECT_API_VERSION: &str = "keda.sh/v1alpha1";
pub const SCALED_OBJECT_KIND: &str = "ScaledObject";
pub const SCALED_OBJECT_SUFFIX: &str = "-so";
pub const APP_LABEL: &str = "app";

pub const DEFAULT_REPLICAS: u32 = 1;
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const DEFAULT_MEM_REQUEST: &str = "128Mi";
pub const DEFAULT_CPU_LIMIT: &str = "250m";
pub const DEFAULT_MEM_LIMIT: &str = "256Mi";
pub const DEFAULT_MIN_REPLICAS: u32 = 1;
pub const DEFAULT_MAX_REPLICAS: u32 = 10;

/// DNS-1123 label limit
pub const MAX_NAME_LENGTH: usize = 63;
