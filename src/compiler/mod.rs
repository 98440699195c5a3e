//! Compiler invocation boundary.
//!
//! The session treats the compiler as a black box returning a log and a
//! pass/fail flag; only the first error in the log is interpreted.

mod latex;
mod log_parse;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RepairResult;

pub use latex::LatexCompiler;
pub use log_parse::{first_error, log_excerpt, CompileError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutcome {
    pub success: bool,
    pub log: String,
}

impl CompileOutcome {
    pub fn first_error(&self) -> Option<CompileError> {
        first_error(&self.log)
    }
}

/// Runs one build of a document's main file.
///
/// An `Err` means the compiler itself could not be run; a failed build is an
/// `Ok` outcome with `success == false`.
#[async_trait]
pub trait CompilerInvoker: Send + Sync {
    async fn compile(&self, main_file: &Path) -> RepairResult<CompileOutcome>;
}
