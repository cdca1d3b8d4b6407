//! Command handlers. Each one runs its external calls strictly in sequence
//! and stops at the first failure.

use crate::error::InstallError;
use crate::output::{self, OutputFormat};
use crate::tools::cluster::{ClusterOptions, Kubectl};
use crate::tools::helm::{wait_until_ready, Helm, KedaChart, VerifyPolicy};
use crate::tools::manifest::{load_values, render_manifests, ManifestKind, RenderedManifests};
use crate::tools::runner::Runner;
use crate::tools::status::fetch_status;
use crate::types::DeploymentSpec;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tracing::warn;

pub async fn check_connection<R: Runner>(runner: &R, options: &ClusterOptions) -> Result<()> {
    println!("Attempting to connect to cluster (context: {})...", options.context_label());
    let kubectl = Kubectl::new(runner, options);
    kubectl
        .check_connection()
        .await
        .context("connection test failed; check your kubeconfig, context name and network")?;

    output::print_success("Successfully connected to the Kubernetes cluster.");
    match kubectl.current_context().await {
        Ok(context) => println!("Using context: '{context}'"),
        Err(e) => warn!(error = %e, "could not resolve the current context name"),
    }
    Ok(())
}

/// Settings for `install-tools`.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub chart: KedaChart,
    pub verify: VerifyPolicy,
    pub bootstrap_helm: bool,
}

pub async fn install_tools<R: Runner>(runner: &R, options: &ClusterOptions, plan: &InstallPlan) -> Result<()> {
    let helm = Helm::new(runner, options);
    let kubectl = Kubectl::new(runner, options);
    let chart = &plan.chart;

    println!("Step 1: Ensuring Helm is installed...");
    match helm.version().await.map_err(step("check helm"))? {
        Some(version) => output::print_success(&format!("Helm is already installed ({version}).")),
        None if !plan.bootstrap_helm => return Err(InstallError::HelmMissing.into()),
        None => {
            println!("Helm not found. Attempting to install...");
            helm.bootstrap().await?;
            if helm.version().await.map_err(step("check helm"))?.is_none() {
                return Err(InstallError::HelmNotOnPath(options.helm.clone()).into());
            }
            output::print_success("Helm installed successfully.");
        }
    }

    println!("\nStep 2: Connecting to Kubernetes cluster (context: {})...", options.context_label());
    kubectl
        .check_connection()
        .await
        .map_err(step("connect to cluster"))?;
    output::print_success("Successfully connected.");

    println!("\nStep 3: Adding KEDA Helm repository...");
    output::print_step(&format!("helm repo add {} {}", chart.repo_name, chart.repo_url));
    helm.repo_add(&chart.repo_name, &chart.repo_url)
        .await
        .map_err(step("add helm repo"))?;
    output::print_step("helm repo update");
    helm.repo_update().await.map_err(step("update helm repos"))?;
    output::print_success("KEDA repo added successfully.");

    println!("\nStep 4: Installing KEDA chart (this may take a moment)...");
    helm.upgrade_install(&chart.release, &chart.chart, &chart.namespace)
        .await
        .map_err(step("install chart"))?;
    output::print_success("KEDA chart installation command executed.");

    println!("\nStep 5: Verifying KEDA installation on the cluster...");
    wait_until_ready(&kubectl, &chart.operator_deployment, &chart.namespace, plan.verify).await?;
    output::print_success(&format!(
        "KEDA operator deployment '{}' is running and ready.",
        chart.operator_deployment
    ));

    println!("\n{}", "KEDA installation successful and verified!".cyan().bold());
    Ok(())
}

fn step(name: &'static str) -> impl Fn(crate::error::CommandError) -> InstallError {
    move |source| InstallError::Step { step: name, source }
}

pub async fn create_deployment<R: Runner>(
    runner: &R,
    options: &ClusterOptions,
    values_path: &Path,
    dry_run: bool,
) -> Result<()> {
    output::print_step(&format!("Loading and validating values from '{}'...", values_path.display()));
    let spec = load_values(values_path)?;
    output::print_success("Values file is valid.");

    let rendered = render_manifests(&spec);
    print_rendered(&rendered)?;

    if dry_run {
        println!("\n{}", "Dry run: nothing was applied.".yellow());
        return Ok(());
    }

    output::print_step(&format!("Connecting to Kubernetes cluster (context: {})...", options.context_label()));
    let kubectl = Kubectl::new(runner, options);
    kubectl.check_connection().await.context("could not reach the cluster")?;
    output::print_success("Successfully connected.");

    let deployment_summary = kubectl
        .apply(&rendered.deployment)
        .await
        .with_context(|| format!("failed to apply Deployment '{}'", rendered.deployment.name))?;
    output::print_success(&deployment_summary);

    if let Some(so) = &rendered.scaled_object {
        match kubectl.apply(so).await {
            Ok(summary) => output::print_success(&summary),
            Err(e) => {
                output::print_warning(&format!(
                    "Deployment '{}' was applied ({deployment_summary}), but the ScaledObject was not; reconcile manually.",
                    rendered.deployment.name
                ));
                return Err(e).with_context(|| format!("failed to apply ScaledObject '{}'", so.name));
            }
        }
    }

    print_summary(&spec, &rendered);
    Ok(())
}

fn print_rendered(rendered: &RenderedManifests) -> Result<()> {
    for manifest in rendered.documents() {
        println!("\n--- Prepared {} ---", manifest.kind);
        let yaml = manifest
            .to_yaml()
            .with_context(|| format!("could not serialize {} '{}'", manifest.kind, manifest.name))?;
        match manifest.kind {
            ManifestKind::Deployment => print!("{}", yaml.yellow()),
            ManifestKind::ScaledObject => print!("{}", yaml.cyan()),
        }
    }
    Ok(())
}

fn print_summary(spec: &DeploymentSpec, rendered: &RenderedManifests) {
    output::print_header("Deployment Summary");
    println!("  Deployment Name: {}", spec.name);
    println!("  Namespace:       {}", spec.namespace);
    println!("  Container Image: {}", spec.image);
    println!("  Container Port:  {}", spec.port);
    println!("  Replicas:        {}", spec.replicas);
    if let (Some(scaling), Some(so)) = (&spec.scaling, &rendered.scaled_object) {
        println!("\n  --- KEDA Scaling ---");
        println!("  Trigger Type:     {}", scaling.trigger_type);
        println!("  Min/Max Replicas: {} / {}", scaling.min_replicas, scaling.max_replicas);
        println!("  ScaledObject:     {}", so.name);
    }
    println!("{}", "-".repeat(26));
    println!(
        "\nTo check status, run: keda-deploy get-status {} --namespace {}",
        spec.name, spec.namespace
    );
}

pub async fn get_status<R: Runner>(
    runner: &R,
    options: &ClusterOptions,
    name: &str,
    namespace: &str,
    format: OutputFormat,
) -> Result<()> {
    let kubectl = Kubectl::new(runner, options);
    let report = fetch_status(&kubectl, name, namespace).await?;
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => output::print_json(&report)?,
        OutputFormat::Yaml => output::print_yaml(&report)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StatusError};
    use crate::tools::runner::fake::FakeRunner;
    use std::io::Write;
    use std::time::Duration;

    const WITH_SCALING: &str = r#"
name: kafka-console-consumer
image: bitnami/kafka:latest
namespace: kafka
replicas: 1
scaling:
  trigger_type: kafka
  min_replicas: 0
  max_replicas: 10
  trigger_metadata:
    topic: orders
    lagThreshold: "10"
"#;

    fn values_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_missing_image_makes_no_external_call() {
        let file = values_file("name: web\nnamespace: default\n");
        let runner = FakeRunner::new();
        let err = create_deployment(&runner, &ClusterOptions::default(), file.path(), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingField("image"))
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_bounds_make_no_external_call() {
        let file = values_file(
            "name: w\nimage: i\nnamespace: n\nscaling:\n  trigger_type: kafka\n  min_replicas: 5\n  max_replicas: 2\n  trigger_metadata:\n    topic: t\n",
        );
        let runner = FakeRunner::new();
        let err = create_deployment(&runner, &ClusterOptions::default(), file.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::ReplicaBounds { .. })));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_external_call() {
        let file = values_file(WITH_SCALING);
        let runner = FakeRunner::new();
        create_deployment(&runner, &ClusterOptions::default(), file.path(), true)
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_applies_deployment_then_scaled_object() {
        let file = values_file(WITH_SCALING);
        let runner = FakeRunner::new()
            .ok("namespace/default\n")
            .ok("deployment.apps/kafka-console-consumer created\n")
            .ok("scaledobject.keda.sh/kafka-console-consumer-so created\n");
        let options = ClusterOptions {
            context: Some("kind-dev".to_string()),
            ..Default::default()
        };
        create_deployment(&runner, &options, file.path(), false).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].line(), "kubectl --context kind-dev apply -f -");
        assert!(calls[1].stdin.as_deref().unwrap().contains("kind: Deployment"));
        assert!(calls[2].stdin.as_deref().unwrap().contains("kind: ScaledObject"));
        assert!(calls[2].stdin.as_deref().unwrap().contains("name: kafka-console-consumer-so"));
    }

    #[tokio::test]
    async fn test_scaled_object_failure_is_reported() {
        let file = values_file(WITH_SCALING);
        let runner = FakeRunner::new()
            .ok("")
            .ok("deployment.apps/kafka-console-consumer created\n")
            .fail(1, "error: resource mapping not found for name: \"kafka-console-consumer-so\": no matches for kind \"ScaledObject\"");
        let err = create_deployment(&runner, &ClusterOptions::default(), file.path(), false)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("kafka-console-consumer-so"));
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_get_status_not_found() {
        let runner = FakeRunner::new().fail(1, "Error from server (NotFound): deployments.apps \"ghost\" not found");
        let err = get_status(&runner, &ClusterOptions::default(), "ghost", "default", OutputFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatusError>(),
            Some(StatusError::DeploymentNotFound { .. })
        ));
    }

    fn quick_plan(bootstrap_helm: bool) -> InstallPlan {
        InstallPlan {
            chart: KedaChart::default(),
            verify: VerifyPolicy {
                attempts: 2,
                interval: Duration::ZERO,
            },
            bootstrap_helm,
        }
    }

    #[tokio::test]
    async fn test_install_tools_runs_steps_in_order() {
        let runner = FakeRunner::new()
            .ok("v3.15.0+g1234567\n")
            .ok("namespace/default\n")
            .ok("\"kedacore\" has been added to your repositories\n")
            .ok("Update Complete.\n")
            .ok("Release \"keda\" has been upgraded.\n")
            .ok(r#"{"status": {"replicas": 1, "readyReplicas": 1}}"#);
        install_tools(&runner, &ClusterOptions::default(), &quick_plan(false))
            .await
            .unwrap();

        let lines: Vec<String> = runner.calls().iter().map(|c| c.line()).collect();
        assert_eq!(
            lines,
            vec![
                "helm version --short",
                "kubectl get namespaces --limit=1 -o name",
                "helm repo add kedacore https://kedacore.github.io/charts",
                "helm repo update",
                "helm upgrade --install keda kedacore/keda --namespace keda --create-namespace",
                "kubectl get deployment keda-operator --namespace keda -o json",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_tools_without_helm_and_no_bootstrap() {
        let runner = FakeRunner::new().missing("helm");
        let err = install_tools(&runner, &ClusterOptions::default(), &quick_plan(false))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<InstallError>(), Some(InstallError::HelmMissing)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_install_tools_stops_when_repo_add_fails() {
        let runner = FakeRunner::new()
            .ok("v3.15.0\n")
            .ok("")
            .fail(1, "Error: looks like \"https://example.invalid\" is not a valid chart repository");
        let err = install_tools(&runner, &ClusterOptions::default(), &quick_plan(false))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::Step { step: "add helm repo", .. })
        ));
        assert_eq!(runner.calls().len(), 3);
    }
}
