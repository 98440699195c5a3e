use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli;
use crate::config::RepairConfig;
use crate::encoding::{decode, detect_bytes, EncodingNormalizer};
use crate::error::RepairError;
use crate::workspace::SourceTree;

use super::open_store;

pub fn run_detect_encoding(config: &RepairConfig, files: &[PathBuf]) -> Result<()> {
    for path in files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let tag = detect_bytes(&bytes, config.gbk_pair_threshold);
        let valid = decode(&bytes, tag).is_some();
        println!(
            "{}: {}{} ({} bytes){}",
            path.display(),
            tag,
            if tag.has_bom() { ", BOM" } else { "" },
            bytes.len(),
            if valid { "" } else { " - does not decode cleanly" }
        );
    }
    Ok(())
}

/// Returns whether every file ended up as UTF-8.
pub fn run_fix_encoding(config: &RepairConfig, root: Option<&Path>, files: &[PathBuf]) -> Result<bool> {
    let root = cli::root_or_current_dir(root)?;
    let tree = SourceTree::open(&root)
        .with_context(|| format!("Failed to open source tree {}", root.display()))?;
    let store = open_store(config, &tree)?;
    let normalizer = EncodingNormalizer::new(tree.clone(), store, config.gbk_pair_threshold);

    let mut all_ok = true;
    for path in files {
        let rel = cli::relative_to_tree(&tree, path)?;
        match normalizer.normalize(&rel) {
            Ok(outcome) if outcome.changed => println!(
                "{}: converted from {} (backup #{})",
                outcome.path, outcome.from, outcome.backup
            ),
            Ok(outcome) => println!("{}: already UTF-8", outcome.path),
            Err(err @ RepairError::EncodingConversion { .. }) => {
                all_ok = false;
                println!("{}: {}", rel, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(all_ok)
}
