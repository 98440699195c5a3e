//! The texmend MCP server and its tool routing.

use rmcp::{
    handler::server::router::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use std::time::Instant;
use tracing::{debug, warn};

use crate::compiler::log_excerpt;
use crate::tools::{
    tool_specs, FileArgs, FixCompleteArgs, LineArgs, LineContentArgs, NoArgs, ReadLinesArgs,
    RestoreBackupArgs, SearchArgs, ToolCall, ToolExecutor,
};

/// Compile-log excerpt attached to failed builds.
const LOG_EXCERPT_CHARS: usize = 3000;

#[derive(Clone)]
pub struct TexmendMcpServer {
    executor: ToolExecutor,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl TexmendMcpServer {
    pub fn new(executor: ToolExecutor) -> Self {
        let mut tool_router = Self::tool_router();
        // Descriptions come from the same table the decision policy advertises.
        for spec in tool_specs() {
            if let Some(route) = tool_router.map.get_mut(spec.name) {
                route.attr.description = Some(spec.description.into());
            }
        }
        Self {
            executor,
            tool_router,
        }
    }

    /// Run one call through the executor. Tool failures are reported as
    /// error results, not protocol errors, so the client can react to them.
    async fn run(&self, call: ToolCall) -> Result<CallToolResult, McpError> {
        let started = Instant::now();
        let name = call.name();
        match self.executor.execute(&call).await {
            Ok(output) => {
                debug!("{} completed in {:?}", name, started.elapsed());
                let mut text = output.text;
                if let Some(compile) = output.compile.as_ref().filter(|c| !c.success) {
                    text.push_str("\n\n");
                    text.push_str(&log_excerpt(&compile.log, LOG_EXCERPT_CHARS));
                }
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                warn!("{} failed: {}", name, e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "{}: {}",
                    e.kind(),
                    e
                ))]))
            }
        }
    }

    #[tool(name = "read")]
    async fn read(&self, Parameters(args): Parameters<FileArgs>) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::Read(args)).await
    }

    #[tool(name = "readLines")]
    async fn read_lines(
        &self,
        Parameters(args): Parameters<ReadLinesArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::ReadLines(args)).await
    }

    #[tool(name = "replaceLine")]
    async fn replace_line(
        &self,
        Parameters(args): Parameters<LineContentArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::ReplaceLine(args)).await
    }

    #[tool(name = "insertLine")]
    async fn insert_line(
        &self,
        Parameters(args): Parameters<LineContentArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::InsertLine(args)).await
    }

    #[tool(name = "deleteLine")]
    async fn delete_line(
        &self,
        Parameters(args): Parameters<LineArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::DeleteLine(args)).await
    }

    #[tool(name = "detectEncoding")]
    async fn detect_encoding(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::DetectEncoding(args)).await
    }

    #[tool(name = "fixEncoding")]
    async fn fix_encoding(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::FixEncoding(args)).await
    }

    #[tool(name = "validate")]
    async fn validate(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::Validate(args)).await
    }

    #[tool(name = "createBackup")]
    async fn create_backup(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::CreateBackup(args)).await
    }

    #[tool(name = "restoreBackup")]
    async fn restore_backup(
        &self,
        Parameters(args): Parameters<RestoreBackupArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::RestoreBackup(args)).await
    }

    #[tool(name = "listFiles")]
    async fn list_files(
        &self,
        Parameters(args): Parameters<NoArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::ListFiles(args)).await
    }

    #[tool(name = "searchFiles")]
    async fn search_files(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::SearchFiles(args)).await
    }

    #[tool(name = "compile")]
    async fn compile(
        &self,
        Parameters(args): Parameters<NoArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::Compile(args)).await
    }

    #[tool(name = "fixComplete")]
    async fn fix_complete(
        &self,
        Parameters(args): Parameters<FixCompleteArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolCall::FixComplete(args)).await
    }
}

#[tool_handler]
impl ServerHandler for TexmendMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "texmend".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "texmend repairs the LaTeX source tree rooted at {} (main file {}). \
                 Line numbers always refer to the current file; re-read after inserting or deleting. \
                 Every edit is backed up and can be undone with restoreBackup.",
                self.executor.tree().root().display(),
                self.executor.main_file()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::compiler::LatexCompiler;
    use crate::tools::ExecutorOptions;
    use crate::workspace::SourceTree;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(src: &TempDir, backups: &TempDir) -> TexmendMcpServer {
        std::fs::write(src.path().join("main.tex"), "a\nb\n").unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = Arc::new(BackupStore::open(&tree, backups.path()).unwrap());
        let executor = ToolExecutor::new(
            tree,
            "main.tex",
            store,
            Arc::new(LatexCompiler::new("xelatex", Vec::new())),
            ExecutorOptions {
                gbk_threshold: 0.01,
                read_limit_bytes: 30_000,
                compile_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();
        TexmendMcpServer::new(executor)
    }

    #[test]
    fn test_server_info() {
        let (src, backups) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let info = server(&src, &backups).get_info();
        assert_eq!(info.server_info.name, "texmend");
        assert!(info.instructions.unwrap().contains("main.tex"));
    }

    #[test]
    fn test_tool_descriptions_match_policy_specs() {
        let (src, backups) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let server = server(&src, &backups);
        let tools = server.tool_router.list_all();
        let specs = tool_specs();
        assert_eq!(tools.len(), specs.len());
        for spec in &specs {
            let tool = tools.iter().find(|t| t.name == spec.name).unwrap();
            assert_eq!(tool.description.as_deref(), Some(spec.description));
        }
    }

    #[tokio::test]
    async fn test_tool_failure_is_an_error_result() {
        let (src, backups) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let server = server(&src, &backups);

        let ok = server
            .run(ToolCall::DeleteLine(LineArgs {
                file: "main.tex".into(),
                line: 1,
            }))
            .await
            .unwrap();
        assert_ne!(ok.is_error, Some(true));
        assert_eq!(std::fs::read_to_string(src.path().join("main.tex")).unwrap(), "b\n");

        let failed = server
            .run(ToolCall::DeleteLine(LineArgs {
                file: "main.tex".into(),
                line: 9,
            }))
            .await
            .unwrap();
        assert_eq!(failed.is_error, Some(true));
    }
}
