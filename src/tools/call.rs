//! The closed set of repair tools and their typed arguments.
//!
//! Decision policies name tools by string; [`ToolCall::parse`] is the only
//! place where that string is interpreted. Everything past it matches on the
//! enum.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RepairError, RepairResult};

/// A file in the source tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileArgs {
    /// Path relative to the source tree root, e.g. `sections/intro.tex`
    #[serde(alias = "filename")]
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReadLinesArgs {
    /// Path relative to the source tree root
    #[serde(alias = "filename")]
    pub file: String,
    /// First line to return (1-indexed, default 1)
    #[serde(default)]
    pub start: Option<usize>,
    /// Last line to return (inclusive, default: end of file)
    #[serde(default)]
    pub end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineContentArgs {
    /// Path relative to the source tree root
    #[serde(alias = "filename")]
    pub file: String,
    /// 1-indexed line number in the current file
    #[serde(alias = "line_number", alias = "lineNumber")]
    pub line: usize,
    /// Single line of text, without a line break
    #[serde(alias = "new_content", alias = "newContent")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineArgs {
    /// Path relative to the source tree root
    #[serde(alias = "filename")]
    pub file: String,
    /// 1-indexed line number in the current file
    #[serde(alias = "line_number", alias = "lineNumber")]
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RestoreBackupArgs {
    /// Path relative to the source tree root
    #[serde(alias = "filename")]
    pub file: String,
    /// Backup sequence number to restore (default: most recent backup)
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Regular expression matched against each line of every .tex file
    pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FixCompleteArgs {
    /// What was fixed
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "camelCase")]
pub enum ToolCall {
    Read(FileArgs),
    ReadLines(ReadLinesArgs),
    ReplaceLine(LineContentArgs),
    InsertLine(LineContentArgs),
    DeleteLine(LineArgs),
    DetectEncoding(FileArgs),
    FixEncoding(FileArgs),
    Validate(FileArgs),
    CreateBackup(FileArgs),
    RestoreBackup(RestoreBackupArgs),
    ListFiles(NoArgs),
    SearchFiles(SearchArgs),
    Compile(NoArgs),
    FixComplete(FixCompleteArgs),
}

/// Map a tool name, in either the camelCase or the snake_case spelling, to
/// its canonical name.
fn canonical_name(name: &str) -> Option<&'static str> {
    let canonical = match name.trim() {
        "read" | "read_file" => "read",
        "readLines" | "read_lines" => "readLines",
        "replaceLine" | "replace_line" => "replaceLine",
        "insertLine" | "insert_line" => "insertLine",
        "deleteLine" | "delete_line" => "deleteLine",
        "detectEncoding" | "detect_encoding" => "detectEncoding",
        "fixEncoding" | "fix_encoding" => "fixEncoding",
        "validate" | "validate_latex" => "validate",
        "createBackup" | "create_backup" => "createBackup",
        "restoreBackup" | "restore_backup" => "restoreBackup",
        "listFiles" | "list_files" => "listFiles",
        "searchFiles" | "search_files" | "search_in_files" => "searchFiles",
        "compile" | "compile_latex" => "compile",
        "fixComplete" | "fix_complete" => "fixComplete",
        _ => return None,
    };
    Some(canonical)
}

impl ToolCall {
    /// Build a call from a policy's tool name and JSON arguments.
    ///
    /// Arguments may be an object, `null` for tools without arguments, or a
    /// JSON-encoded string of an object.
    pub fn parse(name: &str, arguments: &Value) -> RepairResult<Self> {
        let tool = canonical_name(name)
            .ok_or_else(|| RepairError::InvalidToolCall(format!("unknown tool '{}'", name)))?;

        let args = match arguments {
            Value::Null => json!({}),
            Value::String(encoded) if encoded.trim().is_empty() => json!({}),
            Value::String(encoded) => serde_json::from_str(encoded).map_err(|e| {
                RepairError::InvalidToolCall(format!("{}: arguments are not JSON: {}", tool, e))
            })?,
            other => other.clone(),
        };

        serde_json::from_value(json!({ "tool": tool, "args": args }))
            .map_err(|e| RepairError::InvalidToolCall(format!("{}: {}", tool, e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Read(_) => "read",
            ToolCall::ReadLines(_) => "readLines",
            ToolCall::ReplaceLine(_) => "replaceLine",
            ToolCall::InsertLine(_) => "insertLine",
            ToolCall::DeleteLine(_) => "deleteLine",
            ToolCall::DetectEncoding(_) => "detectEncoding",
            ToolCall::FixEncoding(_) => "fixEncoding",
            ToolCall::Validate(_) => "validate",
            ToolCall::CreateBackup(_) => "createBackup",
            ToolCall::RestoreBackup(_) => "restoreBackup",
            ToolCall::ListFiles(_) => "listFiles",
            ToolCall::SearchFiles(_) => "searchFiles",
            ToolCall::Compile(_) => "compile",
            ToolCall::FixComplete(_) => "fixComplete",
        }
    }

    /// Whether this call runs the compiler.
    pub fn compiles(&self) -> bool {
        matches!(self, ToolCall::Compile(_) | ToolCall::FixComplete(_))
    }
}

/// Name, description and JSON schema of one tool, for policies that need to
/// advertise the toolset.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({ "type": "object" }));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "read",
            description: "Read a whole source file with line numbers. Large files are truncated in the middle.",
            parameters: schema::<FileArgs>(),
        },
        ToolSpec {
            name: "readLines",
            description: "Read a range of lines (1-indexed, inclusive) from a file, with line numbers.",
            parameters: schema::<ReadLinesArgs>(),
        },
        ToolSpec {
            name: "replaceLine",
            description: "Replace exactly one line of a file. The file is backed up first.",
            parameters: schema::<LineContentArgs>(),
        },
        ToolSpec {
            name: "insertLine",
            description: "Insert a new line at the given position; lineCount+1 appends. Later line numbers shift down by one.",
            parameters: schema::<LineContentArgs>(),
        },
        ToolSpec {
            name: "deleteLine",
            description: "Delete exactly one line. Later line numbers shift up by one.",
            parameters: schema::<LineArgs>(),
        },
        ToolSpec {
            name: "detectEncoding",
            description: "Report a file's byte encoding (UTF-8, UTF-8-BOM, UTF-16LE/BE, GBK or UNKNOWN).",
            parameters: schema::<FileArgs>(),
        },
        ToolSpec {
            name: "fixEncoding",
            description: "Convert a file to UTF-8 without BOM. Required before line edits on non-UTF-8 files.",
            parameters: schema::<FileArgs>(),
        },
        ToolSpec {
            name: "validate",
            description: "Check brace balance, environment balance and known corruption patterns in a file.",
            parameters: schema::<FileArgs>(),
        },
        ToolSpec {
            name: "createBackup",
            description: "Snapshot a file's current content.",
            parameters: schema::<FileArgs>(),
        },
        ToolSpec {
            name: "restoreBackup",
            description: "Restore a file from a backup (the most recent one unless seq is given). The restore is itself backed up.",
            parameters: schema::<RestoreBackupArgs>(),
        },
        ToolSpec {
            name: "listFiles",
            description: "List the source files (.tex .sty .cls .bbl .bib) in the tree.",
            parameters: schema::<NoArgs>(),
        },
        ToolSpec {
            name: "searchFiles",
            description: "Search .tex files for a regular expression. Returns at most 50 matching lines.",
            parameters: schema::<SearchArgs>(),
        },
        ToolSpec {
            name: "compile",
            description: "Compile the main file and report the first error with a log excerpt. During a repair session it is refused while edited files still have validation errors.",
            parameters: schema::<NoArgs>(),
        },
        ToolSpec {
            name: "fixComplete",
            description: "Declare the repair finished. The document is compiled to confirm.",
            parameters: schema::<FixCompleteArgs>(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_names() {
        let call = ToolCall::parse(
            "replaceLine",
            &json!({"file": "main.tex", "line": 3, "content": "x"}),
        )
        .unwrap();
        assert_eq!(
            call,
            ToolCall::ReplaceLine(LineContentArgs {
                file: "main.tex".into(),
                line: 3,
                content: "x".into()
            })
        );
        assert_eq!(call.name(), "replaceLine");
    }

    #[test]
    fn test_parse_snake_case_names_and_argument_aliases() {
        let call = ToolCall::parse(
            "replace_line",
            &json!({"filename": "a.tex", "line_number": 2, "new_content": "y"}),
        )
        .unwrap();
        assert!(matches!(call, ToolCall::ReplaceLine(ref a) if a.file == "a.tex" && a.line == 2));

        let call = ToolCall::parse("compile_latex", &json!({"main_file": "main.tex"})).unwrap();
        assert!(call.compiles());
    }

    #[test]
    fn test_parse_null_and_encoded_arguments() {
        assert_eq!(
            ToolCall::parse("listFiles", &Value::Null).unwrap(),
            ToolCall::ListFiles(NoArgs {})
        );
        let call = ToolCall::parse("deleteLine", &json!("{\"file\":\"a.tex\",\"line\":1}")).unwrap();
        assert_eq!(call.name(), "deleteLine");
    }

    #[test]
    fn test_unknown_tool_and_bad_arguments_are_invalid_tool_calls() {
        let err = ToolCall::parse("rm_rf", &json!({})).unwrap_err();
        assert!(matches!(err, RepairError::InvalidToolCall(_)));
        assert!(!err.is_fatal());

        let err = ToolCall::parse("replaceLine", &json!({"file": "a.tex"})).unwrap_err();
        assert!(matches!(err, RepairError::InvalidToolCall(_)));
    }

    #[test]
    fn test_every_tool_has_a_spec() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 14);
        for spec in &specs {
            assert_eq!(canonical_name(spec.name), Some(spec.name));
            assert!(spec.parameters.is_object());
        }
        let replace = specs.iter().find(|s| s.name == "replaceLine").unwrap();
        assert!(replace.parameters["properties"]["content"].is_object());
    }
}
