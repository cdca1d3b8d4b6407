// kubectl wrappers: context lookup, connectivity probe, apply and JSON reads.

use crate::error::{CommandError, CommandResult};
use crate::tools::manifest::Manifest;
use crate::tools::runner::{command_line, Runner};
use serde::de::DeserializeOwned;
use tracing::info;

/// Where and how to reach the cluster.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub kubectl: String,
    pub helm: String,
    /// kubeconfig context; `None` uses the current one
    pub context: Option<String>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            context: None,
        }
    }
}

impl ClusterOptions {
    pub fn context_label(&self) -> &str {
        self.context.as_deref().unwrap_or("default")
    }
}

pub struct Kubectl<'a, R: Runner> {
    runner: &'a R,
    options: &'a ClusterOptions,
}

impl<'a, R: Runner> Kubectl<'a, R> {
    pub fn new(runner: &'a R, options: &'a ClusterOptions) -> Self {
        Self { runner, options }
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() + 2);
        if let Some(context) = &self.options.context {
            out.push("--context".to_string());
            out.push(context.clone());
        }
        out.extend(args.iter().map(|a| a.to_string()));
        out
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> CommandResult<String> {
        self.runner
            .run_checked(&self.options.kubectl, &self.args(args), stdin)
            .await
    }

    /// Name of the context kubectl would use.
    pub async fn current_context(&self) -> CommandResult<String> {
        if let Some(context) = &self.options.context {
            return Ok(context.clone());
        }
        let out = self.run(&["config", "current-context"], None).await?;
        Ok(out.trim().to_string())
    }

    /// Cheapest authenticated call that proves the API server answers.
    pub async fn check_connection(&self) -> CommandResult<()> {
        self.run(&["get", "namespaces", "--limit=1", "-o", "name"], None)
            .await
            .map(|_| ())
    }

    /// `kubectl apply -f -` with the manifest on stdin. Returns kubectl's summary line.
    pub async fn apply(&self, manifest: &Manifest) -> CommandResult<String> {
        let yaml = manifest.to_yaml()?;
        let out = self.run(&["apply", "-f", "-"], Some(&yaml)).await?;
        let summary = out.trim().to_string();
        info!(kind = %manifest.kind, name = %manifest.name, namespace = %manifest.namespace, %summary, "applied");
        Ok(summary)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, kind: &str, name: &str, namespace: &str) -> CommandResult<T> {
        let args = ["get", kind, name, "--namespace", namespace, "-o", "json"];
        let out = self.run(&args, None).await?;
        self.decode(&args, &out)
    }

    pub async fn list_json<T: DeserializeOwned>(&self, kind: &str, namespace: &str, selector: &str) -> CommandResult<T> {
        let args = ["get", kind, "--namespace", namespace, "--selector", selector, "-o", "json"];
        let out = self.run(&args, None).await?;
        self.decode(&args, &out)
    }

    fn decode<T: DeserializeOwned>(&self, args: &[&str], out: &str) -> CommandResult<T> {
        serde_json::from_str(out).map_err(|source| CommandError::Decode {
            command: command_line(&self.options.kubectl, &self.args(args)),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::manifest::{parse_values, render_manifests};
    use crate::tools::runner::fake::FakeRunner;

    fn with_context(context: &str) -> ClusterOptions {
        ClusterOptions {
            context: Some(context.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_context_is_prepended() {
        let runner = FakeRunner::new();
        let options = with_context("staging");
        Kubectl::new(&runner, &options).check_connection().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].line(), "kubectl --context staging get namespaces --limit=1 -o name");
    }

    #[tokio::test]
    async fn test_current_context_without_override() {
        let runner = FakeRunner::new().ok("kind-dev\n");
        let options = ClusterOptions::default();
        let ctx = Kubectl::new(&runner, &options).current_context().await.unwrap();
        assert_eq!(ctx, "kind-dev");
        assert_eq!(runner.calls()[0].line(), "kubectl config current-context");
    }

    #[tokio::test]
    async fn test_current_context_with_override_runs_nothing() {
        let runner = FakeRunner::new();
        let options = with_context("prod");
        let ctx = Kubectl::new(&runner, &options).current_context().await.unwrap();
        assert_eq!(ctx, "prod");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_pipes_manifest() {
        let spec = parse_values("name: web\nimage: nginx\nnamespace: default\n").unwrap();
        let rendered = render_manifests(&spec);
        let runner = FakeRunner::new().ok("deployment.apps/web created\n");
        let options = ClusterOptions::default();

        let summary = Kubectl::new(&runner, &options)
            .apply(&rendered.deployment)
            .await
            .unwrap();
        assert_eq!(summary, "deployment.apps/web created");

        let calls = runner.calls();
        assert_eq!(calls[0].line(), "kubectl apply -f -");
        assert_eq!(calls[0].stdin.as_deref(), Some(rendered.deployment.to_yaml().unwrap().as_str()));
    }

    #[tokio::test]
    async fn test_get_json_decode_error() {
        let runner = FakeRunner::new().ok("not json");
        let options = ClusterOptions::default();
        let err = Kubectl::new(&runner, &options)
            .get_json::<serde_json::Value>("deployment", "web", "default")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Decode { .. }));
    }
}
