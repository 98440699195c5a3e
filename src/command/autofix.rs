use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli;
use crate::config::RepairConfig;
use crate::editor::AutoFixer;
use crate::workspace::SourceTree;

use super::open_store;

/// Run the deterministic fix pass over each file. Returns whether every file
/// ended without structural errors.
pub fn run_autofix(
    config: &RepairConfig,
    root: Option<&Path>,
    files: &[PathBuf],
    json: bool,
) -> Result<bool> {
    let root = cli::root_or_current_dir(root)?;
    let tree = SourceTree::open(&root)
        .with_context(|| format!("Failed to open source tree {}", root.display()))?;
    let store = open_store(config, &tree)?;
    let fixer = AutoFixer::new(tree.clone(), store, config.gbk_pair_threshold);

    let mut reports = Vec::new();
    let mut failed = 0;
    for path in files {
        let rel = cli::relative_to_tree(&tree, path)?;
        match fixer.fix(&rel) {
            Ok(report) => reports.push(report),
            Err(err) if !err.is_fatal() => {
                failed += 1;
                eprintln!("❌ {}: {}", rel, err);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Auto-fix aborted at {}", rel));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let status = if report.is_clean() { "✅" } else { "❌" };
            println!("{} {} (backup #{})", status, report.path, report.backup);
            for fix in &report.fixes {
                println!("   fixed {}", fix);
            }
            if report.rolled_back {
                println!("   typo fixes added errors and were rolled back");
            }
            for diag in report.diagnostics.iter().filter(|d| d.is_error()) {
                println!("   {}", diag);
            }
        }
    }
    Ok(failed == 0 && reports.iter().all(|r| r.is_clean()))
}
