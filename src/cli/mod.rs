mod args;
mod paths;

pub use args::{BackupCommands, Cli, Commands};
pub use paths::{relative_to_tree, resolve_root, root_or_current_dir};
