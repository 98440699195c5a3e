//! Repair toolset: a closed command type and its single executor.

mod call;
mod executor;

pub use call::{
    tool_specs, FileArgs, FixCompleteArgs, LineArgs, LineContentArgs, NoArgs, ReadLinesArgs,
    RestoreBackupArgs, SearchArgs, ToolCall, ToolSpec,
};
pub use executor::{ExecutorOptions, ToolExecutor, ToolOutput};
