use std::path::Path;

use anyhow::Result;

use crate::config::RepairConfig;
use crate::mcp::run_mcp_server;

use super::open_executor;

pub async fn run_mcp(config: &RepairConfig, root: Option<&Path>, main: &Path) -> Result<()> {
    let executor = open_executor(config, root, main)?;
    run_mcp_server(executor).await
}
