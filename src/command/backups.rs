use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::backup::RecordKind;
use crate::cli;
use crate::config::RepairConfig;
use crate::workspace::SourceTree;

use super::open_store;

fn open_tree(root: Option<&Path>) -> Result<SourceTree> {
    let root = cli::root_or_current_dir(root)?;
    SourceTree::open(&root).with_context(|| format!("Failed to open source tree {}", root.display()))
}

pub fn run_backups_list(config: &RepairConfig, root: Option<&Path>, file: Option<&Path>) -> Result<()> {
    let tree = open_tree(root)?;
    let store = open_store(config, &tree)?;

    let records = match file {
        Some(file) => {
            // The file may have been deleted since it was backed up.
            let rel = match cli::relative_to_tree(&tree, file) {
                Ok(rel) => rel,
                Err(_) => SourceTree::normalize(&file.to_string_lossy())?,
            };
            store.list(&rel)
        }
        None => store.records(),
    };

    if records.is_empty() {
        println!("No backups for {}", tree.root().display());
        return Ok(());
    }

    println!("Backups in {}:\n", store.dir().display());
    for record in &records {
        let kind = match (record.kind, record.restored_from) {
            (RecordKind::Restore, Some(from)) => format!("restore of #{}", from),
            (RecordKind::Restore, None) => "restore".to_string(),
            (RecordKind::Snapshot, _) => "snapshot".to_string(),
        };
        println!(
            "  #{:<5} {}  {:>8}B  {:<16} {}",
            record.seq,
            record.captured_at.format("%Y-%m-%d %H:%M:%S"),
            record.size,
            kind,
            record.path
        );
    }
    Ok(())
}

pub fn run_backups_restore(
    config: &RepairConfig,
    root: Option<&Path>,
    file: &Path,
    seq: Option<u64>,
    original: bool,
) -> Result<()> {
    let tree = open_tree(root)?;
    let store = open_store(config, &tree)?;
    let rel = match cli::relative_to_tree(&tree, file) {
        Ok(rel) => rel,
        Err(_) => SourceTree::normalize(&file.to_string_lossy())?,
    };

    let record = match (seq, original) {
        (Some(seq), _) => store.find(&rel, seq),
        (None, true) => store.earliest(&rel),
        (None, false) => store.latest(&rel),
    };
    let Some(record) = record else {
        bail!("No matching backup for {}", rel);
    };

    let restore = store.restore(&rel, &record)?;
    println!(
        "✅ Restored {} to backup #{} (recorded as #{})",
        rel, record.seq, restore.seq
    );
    Ok(())
}
