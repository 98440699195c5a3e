//! MCP (Model Context Protocol) server using rmcp.
//!
//! Exposes the repair toolset over stdio so that an external agent host can
//! act as the decision policy. Every call goes through the same
//! [`crate::tools::ToolExecutor`] as a repair session, so edits are backed up
//! the same way.

mod handlers;
mod server;

pub use handlers::run_mcp_server;
pub use server::TexmendMcpServer;
