//! Source tree root and path resolution.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{RepairError, RepairResult};

/// One document's compilable input: a canonical root directory.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    /// Open a source tree rooted at `root`. The root is canonicalized so that
    /// backup directories and relative names stay stable across invocations.
    pub fn open(root: impl AsRef<Path>) -> RepairResult<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| RepairError::io(root, e))?;
        if !root.is_dir() {
            return Err(RepairError::io(
                &root,
                io::Error::new(io::ErrorKind::InvalidInput, "source root is not a directory"),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a caller-supplied relative path to the `a/b.tex` form used in
    /// logs, backups and policy context.
    pub fn normalize(rel: &str) -> RepairResult<String> {
        let cleaned = rel.trim().replace('\\', "/");
        let cleaned = cleaned.trim_start_matches("./");
        if cleaned.is_empty() {
            return Err(RepairError::InvalidArgument("empty file path".into()));
        }

        let path = Path::new(cleaned);
        if path.is_absolute() || cleaned.starts_with('/') {
            return Err(RepairError::PathEscape(rel.to_string()));
        }
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => return Err(RepairError::PathEscape(rel.to_string())),
            }
        }
        if parts.is_empty() {
            return Err(RepairError::InvalidArgument(format!("not a file path: {}", rel)));
        }
        Ok(parts.join("/"))
    }

    /// Resolve a relative path inside the tree.
    pub fn resolve(&self, rel: &str) -> RepairResult<PathBuf> {
        let normalized = Self::normalize(rel)?;
        Ok(self.root.join(normalized))
    }

    /// Inverse of [`SourceTree::resolve`] for paths already inside the tree.
    pub fn relative(&self, abs: &Path) -> Option<String> {
        let rel = abs.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Read the authoritative on-disk bytes of a source file.
    pub fn read_bytes(&self, rel: &str) -> RepairResult<Vec<u8>> {
        let path = self.resolve(rel)?;
        fs::read(&path).map_err(|e| RepairError::io(&path, e))
    }

    /// Replace a source file's bytes atomically.
    pub fn write_bytes(&self, rel: &str, bytes: &[u8]) -> RepairResult<()> {
        let path = self.resolve(rel)?;
        write_atomic(&path, bytes).map_err(|e| RepairError::io(&path, e))?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Write `bytes` to `path` through a temporary sibling file that is renamed
/// over the target. The temporary file is removed on every error path.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    // Keep the original permissions when overwriting.
    if let Ok(metadata) = fs::metadata(path) {
        let _ = fs::set_permissions(tmp.path(), metadata.permissions());
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
