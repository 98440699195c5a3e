//! Line-addressable editing of source files.

mod autofix;
mod lines;
mod text;

#[cfg(test)]
mod tests;

pub use autofix::{AutoFixReport, AutoFixer};
pub use lines::LineEditor;
