//! keda-deploy: install KEDA, apply KEDA-scaled Deployments from values files, report status.

mod commands;
mod error;
mod mcp;
mod output;
mod tools;
mod types;

use clap::{Args, Parser, Subcommand};
use commands::InstallPlan;
use output::OutputFormat;
use std::path::PathBuf;
use std::time::Duration;
use tools::cluster::ClusterOptions;
use tools::helm::{KedaChart, VerifyPolicy};
use tools::runner::ProcessRunner;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "keda-deploy",
    about = "Automate KEDA installs and KEDA-scaled Deployments through kubectl and Helm",
    version,
    propagate_version = true
)]
struct Cli {
    /// The Kubernetes context to use. Overrides the current context in your kubeconfig.
    #[arg(long, global = true, env = "KEDA_DEPLOY_CONTEXT")]
    context: Option<String>,

    /// kubectl binary to invoke
    #[arg(long, global = true, env = "KEDA_DEPLOY_KUBECTL", default_value = "kubectl")]
    kubectl: String,

    /// helm binary to invoke
    #[arg(long, global = true, env = "KEDA_DEPLOY_HELM", default_value = "helm")]
    helm: String,

    /// Log every external command (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Checks the connection to the Kubernetes cluster
    CheckConnection,
    /// Installs KEDA on the cluster using Helm
    InstallTools(InstallArgs),
    /// Creates a Deployment and KEDA ScaledObject from a YAML values file
    CreateDeployment {
        /// Path to a YAML file with deployment values
        #[arg(long = "values", value_name = "PATH")]
        values: PathBuf,
        /// Render and print the manifests without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Gets the health status for a given deployment
    GetStatus {
        deployment_name: String,
        /// The namespace of the deployment
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Report format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Serves manifest rendering and validation as MCP tools on stdio
    ServeMcp,
}

#[derive(Args)]
struct InstallArgs {
    /// Fail instead of running the upstream installer when helm is missing
    #[arg(long)]
    skip_helm_bootstrap: bool,
    #[arg(long, default_value = "kedacore")]
    repo_name: String,
    #[arg(long, default_value = "https://kedacore.github.io/charts")]
    repo_url: String,
    #[arg(long, default_value = "keda")]
    release: String,
    #[arg(long, default_value = "kedacore/keda")]
    chart: String,
    /// Namespace KEDA is installed into (created if missing)
    #[arg(long, default_value = "keda")]
    keda_namespace: String,
    /// Deployment that must become ready for the install to count as verified
    #[arg(long, default_value = "keda-operator")]
    operator_deployment: String,
    /// Readiness checks before giving up
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..))]
    verify_attempts: u32,
    /// Seconds between readiness checks
    #[arg(long, default_value_t = 10)]
    verify_interval: u64,
}

impl From<InstallArgs> for InstallPlan {
    fn from(args: InstallArgs) -> Self {
        InstallPlan {
            chart: KedaChart {
                repo_name: args.repo_name,
                repo_url: args.repo_url,
                release: args.release,
                chart: args.chart,
                namespace: args.keda_namespace,
                operator_deployment: args.operator_deployment,
            },
            verify: VerifyPolicy {
                attempts: args.verify_attempts,
                interval: Duration::from_secs(args.verify_interval),
            },
            bootstrap_helm: !args.skip_helm_bootstrap,
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = ClusterOptions {
        kubectl: cli.kubectl,
        helm: cli.helm,
        context: cli.context,
    };
    let runner = ProcessRunner;

    match cli.command {
        Commands::CheckConnection => commands::check_connection(&runner, &options).await,
        Commands::InstallTools(args) => {
            commands::install_tools(&runner, &options, &InstallPlan::from(args)).await
        }
        Commands::CreateDeployment { values, dry_run } => {
            commands::create_deployment(&runner, &options, &values, dry_run).await
        }
        Commands::GetStatus {
            deployment_name,
            namespace,
            output,
        } => commands::get_status(&runner, &options, &deployment_name, &namespace, output).await,
        Commands::ServeMcp => mcp::serve().await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "keda_deploy=debug" } else { "keda_deploy=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
