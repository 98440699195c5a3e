use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::RepairConfig;
use crate::encoding::decode_lossy;
use crate::validator::{format_report, validate, validate_document};

/// Validate each file on its own. A file containing `\documentclass` also
/// gets the document-structure checks. Returns whether no errors were found.
pub fn run_validate(config: &RepairConfig, files: &[PathBuf]) -> Result<bool> {
    let mut clean = true;
    for path in files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let (_, text) = decode_lossy(&bytes, config.gbk_pair_threshold);
        let name = path.display().to_string();
        let diagnostics = if text.contains("\\documentclass") {
            validate_document(&name, &text)
        } else {
            validate(&name, &text)
        };

        if diagnostics.iter().any(|d| d.is_error()) {
            clean = false;
        }
        if files.len() > 1 {
            println!("== {}", name);
        }
        print!("{}", format_report(&diagnostics));
        if diagnostics.is_empty() {
            println!();
        }
    }
    Ok(clean)
}
