mod autofix;
mod backups;
mod encoding;
mod mcp;
mod repair;
mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backup::BackupStore;
use crate::cli;
use crate::compiler::LatexCompiler;
use crate::config::RepairConfig;
use crate::tools::ToolExecutor;
use crate::workspace::SourceTree;

pub use autofix::run_autofix;
pub use backups::{run_backups_list, run_backups_restore};
pub use encoding::{run_detect_encoding, run_fix_encoding};
pub use mcp::run_mcp;
pub use repair::{run_repair, RepairOptions};
pub use validate::run_validate;

fn open_store(config: &RepairConfig, tree: &SourceTree) -> Result<Arc<BackupStore>> {
    let backup_dir = config.backup_dir()?;
    let store = BackupStore::open(tree, &backup_dir)
        .with_context(|| format!("Failed to open backup store in {}", backup_dir.display()))?;
    Ok(Arc::new(store))
}

/// Build the executor for the document whose main file is `main`.
fn open_executor(config: &RepairConfig, root: Option<&Path>, main: &Path) -> Result<ToolExecutor> {
    let root = cli::resolve_root(root, main)?;
    let tree = SourceTree::open(&root)
        .with_context(|| format!("Failed to open source tree {}", root.display()))?;
    let main_rel = cli::relative_to_tree(&tree, main)?;
    let store = open_store(config, &tree)?;
    let compiler = Arc::new(LatexCompiler::new(
        config.compiler.clone(),
        config.compiler_args.clone(),
    ));
    let executor = ToolExecutor::new(tree, &main_rel, store, compiler, config.executor_options())?;
    Ok(executor)
}
