//! MCP server startup.

use anyhow::Result;
use tracing::{error, info};

use crate::tools::ToolExecutor;

use super::server::TexmendMcpServer;

/// Serve the toolset for `executor` over stdio until the client disconnects.
pub async fn run_mcp_server(executor: ToolExecutor) -> Result<()> {
    use rmcp::{transport::stdio, ServiceExt};

    info!(
        "Starting texmend MCP server for {} (main file {})",
        executor.tree().root().display(),
        executor.main_file()
    );

    let server = TexmendMcpServer::new(executor);
    let service = server.serve(stdio()).await.map_err(|e| {
        error!("Failed to start MCP service: {:?}", e);
        anyhow::anyhow!("Failed to start MCP service: {:?}", e)
    })?;

    info!("Ready for MCP client connections");
    service.waiting().await.map_err(|e| {
        error!("MCP service error: {:?}", e);
        anyhow::anyhow!("MCP service error: {:?}", e)
    })?;

    info!("MCP server shutting down");
    Ok(())
}
