//! Runs a TeX engine as a child process.

use std::path::Path;
use std::process::Stdio;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CompileOutcome, CompilerInvoker};
use crate::error::{RepairError, RepairResult};

#[cfg(windows)]
const PATH_SEP: &str = ";";
#[cfg(not(windows))]
const PATH_SEP: &str = ":";

#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: String,
    args: Vec<String>,
}

impl LatexCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}

/// Whether the engine produced a fresh PDF even though it exited non-zero.
fn pdf_written_since(main_file: &Path, started: SystemTime) -> bool {
    std::fs::metadata(main_file.with_extension("pdf"))
        .and_then(|m| m.modified())
        .map(|modified| modified >= started)
        .unwrap_or(false)
}

#[async_trait]
impl CompilerInvoker for LatexCompiler {
    async fn compile(&self, main_file: &Path) -> RepairResult<CompileOutcome> {
        let dir = main_file.parent().ok_or_else(|| {
            RepairError::InvalidArgument(format!("{} has no parent directory", main_file.display()))
        })?;
        let file_name = main_file.file_name().ok_or_else(|| {
            RepairError::InvalidArgument(format!("{} is not a file", main_file.display()))
        })?;

        info!("Compiling {} with {}", main_file.display(), self.program);
        let started = SystemTime::now();
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(file_name)
            .current_dir(dir)
            .env("TEXINPUTS", format!(".{}{}{}", PATH_SEP, dir.display(), PATH_SEP))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RepairError::CompilerUnavailable(format!("{}: {}", self.program, e)))?;

        let log = combine_output(&output.stdout, &output.stderr);
        let mut success = output.status.success();
        if !success && pdf_written_since(main_file, started) {
            warn!(
                "{} exited with {} but produced a PDF; treating as success",
                self.program, output.status
            );
            success = true;
        }
        debug!("Compile finished: success={}, {} bytes of log", success, log.len());

        Ok(CompileOutcome { success, log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_engine_is_compiler_unavailable() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join("main.tex");
        std::fs::write(&main, "x").unwrap();

        let compiler = LatexCompiler::new("texmend-no-such-engine", vec![]);
        let err = compiler.compile(&main).await.unwrap_err();
        assert!(matches!(err, RepairError::CompilerUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides_success() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join("main.tex");
        std::fs::write(&main, "x").unwrap();

        let ok = LatexCompiler::new("true", vec![]).compile(&main).await.unwrap();
        assert!(ok.success);
        let failed = LatexCompiler::new("false", vec![]).compile(&main).await.unwrap();
        assert!(!failed.success);
    }

    #[test]
    fn test_combine_output() {
        assert_eq!(combine_output(b"out", b""), "out");
        assert_eq!(combine_output(b"", b"err"), "err");
        assert_eq!(combine_output(b"out", b"err"), "out\nerr");
    }
}
