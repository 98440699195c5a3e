use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::workspace::SourceTree;

/// Resolve the source tree root: `root` if given, else the directory that
/// contains `main`.
pub fn resolve_root(root: Option<&Path>, main: &Path) -> Result<PathBuf> {
    match root {
        Some(path) => path
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize source root: {}", path.display())),
        None => {
            let main = main
                .canonicalize()
                .with_context(|| format!("Main file not found: {}", main.display()))?;
            main.parent()
                .map(Path::to_path_buf)
                .with_context(|| format!("Main file has no parent directory: {}", main.display()))
        }
    }
}

/// `root` if given, else the current directory.
pub fn root_or_current_dir(root: Option<&Path>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Express a command-line path relative to the tree root.
pub fn relative_to_tree(tree: &SourceTree, path: &Path) -> Result<String> {
    let abs = path
        .canonicalize()
        .with_context(|| format!("File not found: {}", path.display()))?;
    tree.relative(&abs).with_context(|| {
        format!(
            "{} is not inside the source tree {}",
            path.display(),
            tree.root().display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_root_defaults_to_main_file_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("paper")).unwrap();
        let main = dir.path().join("paper/main.tex");
        std::fs::write(&main, "x").unwrap();

        let root = resolve_root(None, &main).unwrap();
        assert_eq!(root, dir.path().join("paper").canonicalize().unwrap());

        let tree = SourceTree::open(dir.path()).unwrap();
        assert_eq!(relative_to_tree(&tree, &main).unwrap(), "paper/main.tex");
    }

    #[test]
    fn test_file_outside_tree_is_rejected() {
        let tree_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let stray = other.path().join("x.tex");
        std::fs::write(&stray, "x").unwrap();

        let tree = SourceTree::open(tree_dir.path()).unwrap();
        assert!(relative_to_tree(&tree, &stray).is_err());
        assert!(resolve_root(None, &tree_dir.path().join("missing.tex")).is_err());
    }
}
