//! Helm operations for installing KEDA.
//!
//! Uses the helm CLI; the cluster context is passed through `--kube-context`.

use crate::error::{CommandError, CommandResult, InstallError};
use crate::tools::cluster::{ClusterOptions, Kubectl};
use crate::tools::runner::Runner;
use crate::tools::status::DeploymentObject;
use std::time::Duration;
use tracing::{debug, info};

/// Upstream Helm 3 installer script
pub const HELM_INSTALL_SCRIPT: &str =
    "curl -fsSL -o get_helm.sh https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 \
     && chmod 700 get_helm.sh && ./get_helm.sh && rm get_helm.sh";

/// What to install and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KedaChart {
    pub repo_name: String,
    pub repo_url: String,
    pub release: String,
    pub chart: String,
    pub namespace: String,
    /// Deployment that must report ready replicas once the chart is up
    pub operator_deployment: String,
}

impl Default for KedaChart {
    fn default() -> Self {
        Self {
            repo_name: "kedacore".to_string(),
            repo_url: "https://kedacore.github.io/charts".to_string(),
            release: "keda".to_string(),
            chart: "kedacore/keda".to_string(),
            namespace: "keda".to_string(),
            operator_deployment: "keda-operator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            attempts: 12,
            interval: Duration::from_secs(10),
        }
    }
}

pub struct Helm<'a, R: Runner> {
    runner: &'a R,
    options: &'a ClusterOptions,
}

impl<'a, R: Runner> Helm<'a, R> {
    pub fn new(runner: &'a R, options: &'a ClusterOptions) -> Self {
        Self { runner, options }
    }

    async fn run(&self, args: Vec<String>) -> CommandResult<String> {
        self.runner.run_checked(&self.options.helm, &args, None).await
    }

    /// Returns the `helm version --short` string, or `None` when helm is not on PATH.
    pub async fn version(&self) -> CommandResult<Option<String>> {
        match self.run(vec!["version".to_string(), "--short".to_string()]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(CommandError::NotInstalled { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs the upstream installer script through `sh -c`.
    pub async fn bootstrap(&self) -> Result<(), InstallError> {
        if cfg!(windows) {
            return Err(InstallError::UnsupportedPlatform);
        }
        info!("installing helm with the upstream script");
        self.runner
            .run_checked("sh", &["-c".to_string(), HELM_INSTALL_SCRIPT.to_string()], None)
            .await
            .map_err(|source| InstallError::Step {
                step: "install helm",
                source,
            })?;
        Ok(())
    }

    pub async fn repo_add(&self, name: &str, url: &str) -> CommandResult<()> {
        self.run(vec!["repo".into(), "add".into(), name.into(), url.into()])
            .await
            .map(|_| ())
    }

    pub async fn repo_update(&self) -> CommandResult<()> {
        self.run(vec!["repo".into(), "update".into()]).await.map(|_| ())
    }

    /// `helm upgrade --install`, creating the namespace if needed.
    pub async fn upgrade_install(&self, release: &str, chart: &str, namespace: &str) -> CommandResult<String> {
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            release.into(),
            chart.into(),
            "--namespace".into(),
            namespace.into(),
            "--create-namespace".into(),
        ];
        if let Some(context) = &self.options.context {
            args.push("--kube-context".into());
            args.push(context.clone());
        }
        self.run(args).await
    }
}

/// Polls a Deployment until it reports at least one ready replica.
///
/// A not-found answer counts as "not yet"; any other kubectl failure aborts.
pub async fn wait_until_ready<R: Runner>(
    kubectl: &Kubectl<'_, R>,
    name: &str,
    namespace: &str,
    policy: VerifyPolicy,
) -> Result<(), InstallError> {
    for attempt in 1..=policy.attempts {
        match kubectl.get_json::<DeploymentObject>("deployment", name, namespace).await {
            Ok(deployment) if deployment.status.ready_replicas.unwrap_or(0) > 0 => {
                info!(%name, %namespace, attempt, "deployment ready");
                return Ok(());
            }
            Ok(_) => {
                println!(
                    "Deployment '{name}' found, but not ready yet. Retrying in {}s... ({attempt}/{})",
                    policy.interval.as_secs(),
                    policy.attempts
                );
            }
            Err(e) if e.is_not_found() => {
                println!(
                    "Deployment '{name}' not found yet. Retrying in {}s... ({attempt}/{})",
                    policy.interval.as_secs(),
                    policy.attempts
                );
            }
            Err(source) => {
                return Err(InstallError::Step {
                    step: "verify installation",
                    source,
                })
            }
        }
        if attempt < policy.attempts {
            debug!(interval = ?policy.interval, "waiting before next check");
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(InstallError::NotReady {
        name: name.to_string(),
        namespace: namespace.to_string(),
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::runner::fake::FakeRunner;

    const NO_WAIT: VerifyPolicy = VerifyPolicy {
        attempts: 3,
        interval: Duration::ZERO,
    };

    #[tokio::test]
    async fn test_version_missing_binary() {
        let runner = FakeRunner::new().missing("helm");
        let options = ClusterOptions::default();
        assert_eq!(Helm::new(&runner, &options).version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upgrade_install_passes_kube_context() {
        let runner = FakeRunner::new();
        let options = ClusterOptions {
            context: Some("staging".to_string()),
            ..Default::default()
        };
        let chart = KedaChart::default();
        Helm::new(&runner, &options)
            .upgrade_install(&chart.release, &chart.chart, &chart.namespace)
            .await
            .unwrap();

        assert_eq!(
            runner.calls()[0].line(),
            "helm upgrade --install keda kedacore/keda --namespace keda --create-namespace --kube-context staging"
        );
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries_not_found() {
        let runner = FakeRunner::new()
            .fail(1, "Error from server (NotFound): deployments.apps \"keda-operator\" not found")
            .ok(r#"{"status": {"replicas": 1}}"#)
            .ok(r#"{"status": {"replicas": 1, "readyReplicas": 1}}"#);
        let options = ClusterOptions::default();
        let kubectl = Kubectl::new(&runner, &options);

        wait_until_ready(&kubectl, "keda-operator", "keda", NO_WAIT).await.unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_stops_on_first_ready() {
        let runner = FakeRunner::new().ok(r#"{"status": {"readyReplicas": 2}}"#);
        let options = ClusterOptions::default();
        let kubectl = Kubectl::new(&runner, &options);

        wait_until_ready(&kubectl, "keda-operator", "keda", NO_WAIT).await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let runner = FakeRunner::new()
            .ok(r#"{"status": {}}"#)
            .ok(r#"{"status": {}}"#)
            .ok(r#"{"status": {}}"#);
        let options = ClusterOptions::default();
        let kubectl = Kubectl::new(&runner, &options);

        let err = wait_until_ready(&kubectl, "keda-operator", "keda", NO_WAIT).await.unwrap_err();
        assert!(matches!(err, InstallError::NotReady { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_wait_until_ready_aborts_on_unknown_context() {
        let runner = FakeRunner::new().fail(1, "error: context was not found for specified context: prod");
        let options = ClusterOptions::default();
        let kubectl = Kubectl::new(&runner, &options);

        let err = wait_until_ready(&kubectl, "keda-operator", "keda", NO_WAIT).await.unwrap_err();
        assert!(matches!(err, InstallError::Step { step: "verify installation", .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_until_ready_aborts_on_api_error() {
        let runner = FakeRunner::new().fail(1, "error: You must be logged in to the server (Unauthorized)");
        let options = ClusterOptions::default();
        let kubectl = Kubectl::new(&runner, &options);

        let err = wait_until_ready(&kubectl, "keda-operator", "keda", NO_WAIT).await.unwrap_err();
        assert!(matches!(err, InstallError::Step { step: "verify installation", .. }));
        assert_eq!(runner.calls().len(), 1);
    }
}
