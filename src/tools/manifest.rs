// Load and validate values files; render Deployment and ScaledObject manifests.

use crate::error::ConfigError;
use crate::types::{
    DeploymentSpec, ParsedScaling, ParsedValues, ResourceSpec, ScalingSpec, APP_LABEL,
    DEFAULT_MAX_REPLICAS, DEFAULT_MIN_REPLICAS, DEFAULT_PORT, DEFAULT_REPLICAS,
    DEPLOYMENT_API_VERSION, DEPLOYMENT_KIND, MAX_NAME_LENGTH, SCALED_OBJECT_API_VERSION,
    SCALED_OBJECT_KIND, SCALED_OBJECT_SUFFIX,
};
use serde_json::{Map as JsonMap, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Deployment,
    ScaledObject,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Deployment => f.write_str(DEPLOYMENT_KIND),
            ManifestKind::ScaledObject => f.write_str(SCALED_OBJECT_KIND),
        }
    }
}

/// One rendered Kubernetes document.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub namespace: String,
    pub body: Value,
}

impl Manifest {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.body)
    }
}

/// The Deployment plus, when scaling is configured, its ScaledObject.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifests {
    pub deployment: Manifest,
    pub scaled_object: Option<Manifest>,
}

impl RenderedManifests {
    /// Documents in apply order: the Deployment first.
    pub fn documents(&self) -> Vec<&Manifest> {
        std::iter::once(&self.deployment)
            .chain(self.scaled_object.as_ref())
            .collect()
    }

    /// Multi-document YAML stream, `---` separated.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let docs = self
            .documents()
            .into_iter()
            .map(Manifest::to_yaml)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }
}

/// Reads and validates a values file.
pub fn load_values(path: &Path) -> Result<DeploymentSpec, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_values(&raw)
}

/// Parses a values document and applies defaults. Fails on the first problem found.
pub fn parse_values(yaml: &str) -> Result<DeploymentSpec, ConfigError> {
    let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    if !doc.is_mapping() {
        return Err(ConfigError::NotAMapping);
    }
    // `scaling:` left empty would otherwise read as "no autoscaling"
    if let Some(scaling) = doc.get("scaling") {
        if !scaling.is_mapping() {
            return Err(ConfigError::invalid("scaling", "must be a mapping; remove the key to disable autoscaling"));
        }
    }
    let parsed: ParsedValues = serde_yaml::from_value(doc)?;

    let name = parsed.name.ok_or(ConfigError::MissingField("name"))?;
    let image = parsed.image.ok_or(ConfigError::MissingField("image"))?;
    let namespace = parsed.namespace.ok_or(ConfigError::MissingField("namespace"))?;

    validate_name("name", &name)?;
    validate_name("namespace", &namespace)?;
    if image.trim().is_empty() {
        return Err(ConfigError::invalid("image", "must not be empty"));
    }

    if let Some(command) = &parsed.command {
        if command.is_empty() {
            return Err(ConfigError::invalid(
                "command",
                "must contain at least one entry; omit it to use the image entrypoint",
            ));
        }
    }

    let port = parsed.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
    }

    let defaults = ResourceSpec::default();
    let resources = ResourceSpec {
        cpu_request: quantity("cpu_request", parsed.cpu_request, defaults.cpu_request)?,
        mem_request: quantity("mem_request", parsed.mem_request, defaults.mem_request)?,
        cpu_limit: quantity("cpu_limit", parsed.cpu_limit, defaults.cpu_limit)?,
        mem_limit: quantity("mem_limit", parsed.mem_limit, defaults.mem_limit)?,
    };

    let scaling = parsed.scaling.map(validate_scaling).transpose()?;

    Ok(DeploymentSpec {
        name,
        image,
        namespace,
        replicas: parsed.replicas.unwrap_or(DEFAULT_REPLICAS),
        command: parsed.command,
        port,
        resources,
        scaling,
    })
}

fn quantity(field: &str, value: Option<String>, default: String) -> Result<String, ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::invalid(field, "must not be empty")),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn validate_scaling(parsed: ParsedScaling) -> Result<ScalingSpec, ConfigError> {
    let trigger_type = parsed
        .trigger_type
        .ok_or(ConfigError::MissingField("scaling.trigger_type"))?;
    let raw_metadata = parsed
        .trigger_metadata
        .ok_or(ConfigError::MissingField("scaling.trigger_metadata"))?;

    if trigger_type.trim().is_empty() {
        return Err(ConfigError::invalid("scaling.trigger_type", "must not be empty"));
    }

    let min = parsed.min_replicas.unwrap_or(DEFAULT_MIN_REPLICAS);
    let max = parsed.max_replicas.unwrap_or(DEFAULT_MAX_REPLICAS);
    if min > max {
        return Err(ConfigError::ReplicaBounds { min, max });
    }

    let mut trigger_metadata = BTreeMap::new();
    for (key, value) in raw_metadata {
        match value {
            serde_yaml::Value::String(s) => {
                trigger_metadata.insert(key, s);
            }
            _ => {
                return Err(ConfigError::invalid(
                    format!("scaling.trigger_metadata.{key}"),
                    "must be a string; quote the value in the values file",
                ));
            }
        }
    }

    Ok(ScalingSpec {
        trigger_type,
        min_replicas: min,
        max_replicas: max,
        trigger_metadata,
    })
}

/// Checks a DNS-1123 label: lowercase alphanumerics and '-', alphanumeric at both ends.
pub fn validate_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(ConfigError::invalid(
            field,
            format!("'{value}' exceeds the maximum length of {MAX_NAME_LENGTH} characters"),
        ));
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(ConfigError::invalid(
            field,
            format!("'{value}' contains invalid character '{ch}'; use lowercase letters, digits and '-'"),
        ));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(ConfigError::invalid(
            field,
            format!("'{value}' must start and end with a letter or digit"),
        ));
    }
    Ok(())
}

/// Renders the Deployment and, if scaling is configured, the ScaledObject.
pub fn render_manifests(spec: &DeploymentSpec) -> RenderedManifests {
    RenderedManifests {
        deployment: render_deployment(spec),
        scaled_object: spec
            .scaling
            .as_ref()
            .map(|scaling| render_scaled_object(spec, scaling)),
    }
}

pub fn scaled_object_name(deployment_name: &str) -> String {
    format!("{deployment_name}{SCALED_OBJECT_SUFFIX}")
}

fn metadata(name: &str, namespace: &str, labels: Option<Value>) -> Value {
    let mut metadata: JsonMap<String, Value> = JsonMap::new();
    metadata.insert("name".to_string(), Value::String(name.to_string()));
    metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
    if let Some(labels) = labels {
        metadata.insert("labels".to_string(), labels);
    }
    Value::Object(metadata)
}

fn app_labels(name: &str) -> Value {
    let mut labels: JsonMap<String, Value> = JsonMap::new();
    labels.insert(APP_LABEL.to_string(), Value::String(name.to_string()));
    Value::Object(labels)
}

fn string_map<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Value {
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
    )
}

fn render_deployment(spec: &DeploymentSpec) -> Manifest {
    let mut container: JsonMap<String, Value> = JsonMap::new();
    container.insert("name".to_string(), Value::String(spec.name.clone()));
    container.insert("image".to_string(), Value::String(spec.image.clone()));
    if let Some(command) = &spec.command {
        container.insert(
            "command".to_string(),
            Value::Array(command.iter().cloned().map(Value::String).collect()),
        );
    }

    let mut port: JsonMap<String, Value> = JsonMap::new();
    port.insert("containerPort".to_string(), Value::from(spec.port));
    container.insert("ports".to_string(), Value::Array(vec![Value::Object(port)]));

    let r = &spec.resources;
    let mut resources: JsonMap<String, Value> = JsonMap::new();
    resources.insert(
        "requests".to_string(),
        string_map([("cpu", r.cpu_request.as_str()), ("memory", r.mem_request.as_str())]),
    );
    resources.insert(
        "limits".to_string(),
        string_map([("cpu", r.cpu_limit.as_str()), ("memory", r.mem_limit.as_str())]),
    );
    container.insert("resources".to_string(), Value::Object(resources));

    let mut pod_metadata: JsonMap<String, Value> = JsonMap::new();
    pod_metadata.insert("labels".to_string(), app_labels(&spec.name));

    let mut pod_spec: JsonMap<String, Value> = JsonMap::new();
    pod_spec.insert("containers".to_string(), Value::Array(vec![Value::Object(container)]));

    let mut template: JsonMap<String, Value> = JsonMap::new();
    template.insert("metadata".to_string(), Value::Object(pod_metadata));
    template.insert("spec".to_string(), Value::Object(pod_spec));

    let mut selector: JsonMap<String, Value> = JsonMap::new();
    selector.insert("matchLabels".to_string(), app_labels(&spec.name));

    let mut deployment_spec: JsonMap<String, Value> = JsonMap::new();
    deployment_spec.insert("replicas".to_string(), Value::from(spec.replicas));
    deployment_spec.insert("selector".to_string(), Value::Object(selector));
    deployment_spec.insert("template".to_string(), Value::Object(template));

    let mut top: JsonMap<String, Value> = JsonMap::new();
    top.insert("apiVersion".to_string(), Value::String(DEPLOYMENT_API_VERSION.to_string()));
    top.insert("kind".to_string(), Value::String(DEPLOYMENT_KIND.to_string()));
    top.insert(
        "metadata".to_string(),
        metadata(&spec.name, &spec.namespace, Some(app_labels(&spec.name))),
    );
    top.insert("spec".to_string(), Value::Object(deployment_spec));

    Manifest {
        kind: ManifestKind::Deployment,
        name: spec.name.clone(),
        namespace: spec.namespace.clone(),
        body: Value::Object(top),
    }
}

fn render_scaled_object(spec: &DeploymentSpec, scaling: &ScalingSpec) -> Manifest {
    let name = scaled_object_name(&spec.name);

    let mut target: JsonMap<String, Value> = JsonMap::new();
    target.insert("name".to_string(), Value::String(spec.name.clone()));

    let mut trigger: JsonMap<String, Value> = JsonMap::new();
    trigger.insert("type".to_string(), Value::String(scaling.trigger_type.clone()));
    trigger.insert(
        "metadata".to_string(),
        string_map(
            scaling
                .trigger_metadata
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        ),
    );

    let mut so_spec: JsonMap<String, Value> = JsonMap::new();
    so_spec.insert("scaleTargetRef".to_string(), Value::Object(target));
    so_spec.insert("minReplicaCount".to_string(), Value::from(scaling.min_replicas));
    so_spec.insert("maxReplicaCount".to_string(), Value::from(scaling.max_replicas));
    so_spec.insert("triggers".to_string(), Value::Array(vec![Value::Object(trigger)]));

    let mut top: JsonMap<String, Value> = JsonMap::new();
    top.insert("apiVersion".to_string(), Value::String(SCALED_OBJECT_API_VERSION.to_string()));
    top.insert("kind".to_string(), Value::String(SCALED_OBJECT_KIND.to_string()));
    top.insert("metadata".to_string(), metadata(&name, &spec.namespace, None));
    top.insert("spec".to_string(), Value::Object(so_spec));

    Manifest {
        kind: ManifestKind::ScaledObject,
        name,
        namespace: spec.namespace.clone(),
        body: Value::Object(top),
    }
}
