//! File listing and search over a source tree.
//!
//! Hidden directories (including any `.git` checkout) are skipped, and only
//! files the TeX toolchain reads as source are reported.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Extensions treated as document source.
pub const SOURCE_EXTENSIONS: &[&str] = &["tex", "sty", "cls", "bbl", "bib"];

/// Maximum number of hits returned by [`search_sources`].
pub const MAX_SEARCH_MATCHES: usize = 50;

/// One line matching a search pattern.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub text: String,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn walk_files<'a>(root: &'a Path, extensions: &'a [&'a str]) -> impl Iterator<Item = DirEntry> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Error walking directory: {}", e);
                None
            }
        })
        .filter(move |e| e.file_type().is_file() && has_extension(e.path(), extensions))
}

/// List every source file under `root` as sorted, `/`-separated relative paths.
pub fn list_sources(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walk_files(root, SOURCE_EXTENSIONS)
        .filter_map(|e| relative_name(root, e.path()))
        .collect();
    files.sort();
    debug!("Found {} source files under {}", files.len(), root.display());
    files
}

/// Search `.tex` files for lines matching `pattern`, stopping after
/// [`MAX_SEARCH_MATCHES`] hits.
pub fn search_sources(root: &Path, pattern: &Regex) -> Vec<SearchHit> {
    let mut entries: Vec<DirEntry> = walk_files(root, &["tex"]).collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    let mut hits = Vec::new();
    for entry in entries {
        let Some(rel) = relative_name(root, entry.path()) else {
            continue;
        };
        let bytes = match fs::read(entry.path()) {
            Ok(b) => b,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        for (idx, line) in content.lines().enumerate() {
            if pattern.is_match(line) {
                hits.push(SearchHit {
                    path: rel.clone(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                });
                if hits.len() >= MAX_SEARCH_MATCHES {
                    return hits;
                }
            }
        }
    }
    hits
}
