//! MCP server exposing manifest rendering and values validation over stdio.
//! No cluster access happens through this surface.

use crate::tools::manifest::{parse_values, render_manifests};
use rmcp::{
    handler::server::ServerHandler,
    model::{CallToolResult, Content},
    tool, tool_handler, tool_router,
    transport::stdio,
    ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ValuesParams {
    /// Values document (YAML): name, image, namespace, replicas, command, scaling
    values: String,
}

/// Multi-document YAML for the values, or the first validation error.
pub fn render_values(values: &str) -> Result<String, String> {
    let spec = parse_values(values).map_err(|e| e.to_string())?;
    render_manifests(&spec).to_yaml().map_err(|e| e.to_string())
}

/// Describes what the values would produce, or the first validation error.
pub fn validate_values(values: &str) -> Result<String, String> {
    let spec = parse_values(values).map_err(|e| e.to_string())?;
    Ok(match &spec.scaling {
        Some(scaling) => format!(
            "Values are valid: Deployment '{}' in namespace '{}' with a '{}' ScaledObject ({}..{} replicas).",
            spec.name, spec.namespace, scaling.trigger_type, scaling.min_replicas, scaling.max_replicas
        ),
        None => format!(
            "Values are valid: Deployment '{}' in namespace '{}' without autoscaling.",
            spec.name, spec.namespace
        ),
    })
}

#[derive(Clone)]
struct KedaDeployMcpService {
    tool_router: rmcp::handler::server::tool::ToolRouter<Self>,
}

#[tool_router]
impl KedaDeployMcpService {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Render a Kubernetes Deployment and KEDA ScaledObject (YAML) from a values document")]
    async fn render_manifests(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<ValuesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        match render_values(&params.0.values) {
            Ok(out) => Ok(CallToolResult::success(vec![Content::text(out)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
        }
    }

    #[tool(description = "Validate a values document (required fields, names, replica bounds, trigger metadata)")]
    async fn validate_values(
        &self,
        params: rmcp::handler::server::wrapper::Parameters<ValuesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        match validate_values(&params.0.values) {
            Ok(out) => Ok(CallToolResult::success(vec![Content::text(out)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Validation error: {e}"
            ))])),
        }
    }
}

#[tool_handler]
impl ServerHandler for KedaDeployMcpService {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo::new(
            rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
        )
        .with_instructions(
            "Render and validate KEDA-scaled Deployment manifests from values documents.",
        )
    }
}

pub async fn serve() -> anyhow::Result<()> {
    info!("serving MCP on stdio");
    let server = KedaDeployMcpService::new().serve(stdio()).await?;
    server.waiting().await?;
    Ok(())
}
