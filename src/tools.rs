//! Sandboxed file-system tools exposed to the model.
//!
//! Five tools operate strictly inside the workspace root: `list_dir`,
//! `read_file`, `grep_files`, `extract_document`, and `insert_text`.
//! Every path argument goes through [`Workspace::resolve`] first, so an
//! escape attempt fails closed before any I/O happens. Dispatch runs
//! each tool on the blocking pool under a per-call timeout.

use globset::{Glob, GlobSetBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::extract;
use crate::workspace::Workspace;

const READ_DEFAULT_LIMIT: usize = 2000;
const READ_MAX_LINE_CHARS: usize = 500;
const GREP_MAX_MATCHES: usize = 100;

/// The tools the model may call, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListDir,
    ReadFile,
    GrepFiles,
    ExtractDocument,
    InsertText,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::ListDir,
        ToolKind::ReadFile,
        ToolKind::GrepFiles,
        ToolKind::ExtractDocument,
        ToolKind::InsertText,
    ];

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "list_dir" => Ok(ToolKind::ListDir),
            "read_file" => Ok(ToolKind::ReadFile),
            "grep_files" => Ok(ToolKind::GrepFiles),
            "extract_document" => Ok(ToolKind::ExtractDocument),
            "insert_text" => Ok(ToolKind::InsertText),
            other => Err(EngineError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ListDir => "list_dir",
            ToolKind::ReadFile => "read_file",
            ToolKind::GrepFiles => "grep_files",
            ToolKind::ExtractDocument => "extract_document",
            ToolKind::InsertText => "insert_text",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ToolKind::ListDir => {
                "List files and directories in the workspace. Directories are suffixed with '/'."
            }
            ToolKind::ReadFile => {
                "Read a text file from the workspace, with line numbers. Supports offset/limit paging for large files."
            }
            ToolKind::GrepFiles => {
                "Search workspace files for a substring (case-insensitive). Returns path:line: matches, most recently modified files first."
            }
            ToolKind::ExtractDocument => {
                "Extract plain text from a document (PDF, DOCX, PPTX, XLSX, or plain text) in the workspace."
            }
            ToolKind::InsertText => {
                "Insert text into a file at a 1-indexed line (and optional column). Creates the file when it does not exist."
            }
        }
    }

    fn parameters_schema(&self) -> Value {
        match self {
            ToolKind::ListDir => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to list, relative to the workspace root (default '.')"
                    },
                    "recursive": {
                        "type": "boolean",
                        "description": "Recurse into subdirectories (default false)"
                    }
                },
                "required": []
            }),
            ToolKind::ReadFile => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File to read, relative to the workspace root"
                    },
                    "offset": {
                        "type": "integer",
                        "description": "1-indexed line to start from (default 1)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of lines to return (default 2000)"
                    }
                },
                "required": ["path"]
            }),
            ToolKind::GrepFiles => json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Substring to search for (case-insensitive)"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search, relative to the workspace root (default '.')"
                    },
                    "include": {
                        "type": "string",
                        "description": "Glob restricting which files are searched, e.g. '*.md'"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of matching lines to return (default 100)"
                    }
                },
                "required": ["pattern"]
            }),
            ToolKind::ExtractDocument => json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Document to extract, relative to the workspace root"
                    }
                },
                "required": ["filename"]
            }),
            ToolKind::InsertText => json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File to modify or create, relative to the workspace root"
                    },
                    "line": {
                        "type": "integer",
                        "description": "1-indexed line at which to insert"
                    },
                    "column": {
                        "type": "integer",
                        "description": "1-indexed character column; 1 (the default) inserts a whole new line"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text to insert"
                    }
                },
                "required": ["path", "line", "text"]
            }),
        }
    }

    /// OpenAI function-calling definition for this tool.
    pub fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// Wire definitions for every tool, in a stable order.
pub fn tool_definitions() -> Vec<Value> {
    ToolKind::ALL.iter().map(|t| t.definition()).collect()
}

/// Result of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    /// Set when the tool created a file that did not exist before.
    pub created_path: Option<String>,
}

impl ToolOutcome {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_path: None,
        }
    }
}

/// Dispatches tool calls into the workspace sandbox.
#[derive(Clone)]
pub struct ToolRouter {
    workspace: Workspace,
    timeout: Duration,
}

impl ToolRouter {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }

    /// Execute one tool call. I/O runs on the blocking pool; a call
    /// exceeding the timeout is abandoned and reported as an error.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<ToolOutcome> {
        let kind = ToolKind::from_name(name)?;
        let workspace = self.workspace.clone();
        let args = args.clone();

        tracing::debug!(tool = name, "dispatching tool call");

        let handle = tokio::task::spawn_blocking(move || run_tool(kind, &workspace, &args));
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::InvalidInput(format!(
                "tool '{}' panicked: {}",
                name, join_err
            ))),
            Err(_) => Err(EngineError::InvalidInput(format!(
                "tool '{}' timed out after {}s",
                name,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn run_tool(kind: ToolKind, workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    match kind {
        ToolKind::ListDir => list_dir(workspace, args),
        ToolKind::ReadFile => read_file(workspace, args),
        ToolKind::GrepFiles => grep_files(workspace, args),
        ToolKind::ExtractDocument => extract_document(workspace, args),
        ToolKind::InsertText => insert_text(workspace, args),
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn required_str<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    str_arg(args, key).ok_or_else(|| {
        EngineError::InvalidInput(format!("{}: missing required argument '{}'", tool, key))
    })
}

fn usize_arg(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

// ============ list_dir ============

fn list_dir(workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    let path = str_arg(args, "path").unwrap_or(".");
    let recursive = args
        .get("recursive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let dir = workspace.resolve(path)?;
    if !dir.is_dir() {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not a directory",
            path
        )));
    }

    let mut entries: Vec<String> = Vec::new();
    if recursive {
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()))
            .filter_map(|e| e.ok())
        {
            let rel = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{}/", rel));
            } else {
                entries.push(rel);
            }
        }
    } else {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if is_hidden(&name) {
                continue;
            }
            let name = name.to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }
    }

    if entries.is_empty() {
        return Ok(ToolOutcome::text("(empty directory)"));
    }
    entries.sort();
    Ok(ToolOutcome::text(entries.join("\n")))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

// ============ read_file ============

fn read_file(workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    let path = required_str(args, "path", "read_file")?;
    let offset = usize_arg(args, "offset").unwrap_or(1).max(1);
    let limit = usize_arg(args, "limit").unwrap_or(READ_DEFAULT_LIMIT).max(1);

    let resolved = workspace.resolve(path)?;
    if !resolved.is_file() {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not a file",
            path
        )));
    }

    let bytes = std::fs::read(&resolved)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();

    if offset > lines.len() && !lines.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "offset {} is past the end of '{}' ({} lines)",
            offset,
            path,
            lines.len()
        )));
    }
    if lines.is_empty() {
        return Ok(ToolOutcome::text("(empty file)"));
    }

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate().skip(offset - 1).take(limit) {
        let rendered = if line.chars().count() > READ_MAX_LINE_CHARS {
            let truncated: String = line.chars().take(READ_MAX_LINE_CHARS).collect();
            format!("{}...", truncated)
        } else {
            (*line).to_string()
        };
        out.push_str(&format!("L{}: {}\n", i + 1, rendered));
    }
    let shown_end = (offset - 1 + limit).min(lines.len());
    if shown_end < lines.len() {
        out.push_str(&format!(
            "(truncated: {} of {} lines shown)\n",
            shown_end - (offset - 1),
            lines.len()
        ));
    }
    Ok(ToolOutcome::text(out.trim_end().to_string()))
}

// ============ grep_files ============

fn grep_files(workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    let pattern = required_str(args, "pattern", "grep_files")?;
    if pattern.is_empty() {
        return Err(EngineError::InvalidInput(
            "grep_files: pattern must not be empty".to_string(),
        ));
    }
    let needle = pattern.to_lowercase();
    let limit = usize_arg(args, "limit").unwrap_or(GREP_MAX_MATCHES).max(1);

    let search_path = str_arg(args, "path").unwrap_or(".");
    let search_root = workspace.resolve(search_path)?;
    if !search_root.is_dir() {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not a directory",
            search_path
        )));
    }

    let include = match str_arg(args, "include") {
        Some(glob) => {
            let mut builder = GlobSetBuilder::new();
            builder.add(Glob::new(glob).map_err(|e| {
                EngineError::InvalidInput(format!("grep_files: bad include glob: {}", e))
            })?);
            Some(builder.build().map_err(|e| {
                EngineError::InvalidInput(format!("grep_files: bad include glob: {}", e))
            })?)
        }
        None => None,
    };

    // Collect candidate files, newest first.
    let mut files: Vec<(std::time::SystemTime, std::path::PathBuf)> = Vec::new();
    for entry in WalkDir::new(&search_root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ref set) = include {
            let rel = entry
                .path()
                .strip_prefix(workspace.root())
                .unwrap_or(entry.path());
            if !set.is_match(rel) && !set.is_match(entry.file_name()) {
                continue;
            }
        }
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        files.push((mtime, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));

    let mut matches: Vec<String> = Vec::new();
    'outer: for (_, file) in &files {
        let Ok(bytes) = std::fs::read(file) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let rel = file
            .strip_prefix(workspace.root())
            .unwrap_or(file)
            .to_string_lossy()
            .to_string();
        for (i, line) in text.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                matches.push(format!("{}:{}: {}", rel, i + 1, line.trim_end()));
                if matches.len() >= limit {
                    break 'outer;
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok(ToolOutcome::text("no matches found"));
    }
    Ok(ToolOutcome::text(matches.join("\n")))
}

// ============ extract_document ============

fn extract_document(workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    let path = required_str(args, "filename", "extract_document")?;
    let resolved = workspace.resolve(path)?;
    if !resolved.is_file() {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not a file",
            path
        )));
    }

    let bytes = std::fs::read(&resolved)?;
    let filename = resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    let parsed = extract::parse(&bytes, &filename)?;
    if parsed.text.trim().is_empty() {
        return Ok(ToolOutcome::text(format!(
            "(no extractable text in {})",
            filename
        )));
    }
    Ok(ToolOutcome::text(parsed.text))
}

// ============ insert_text ============

fn insert_text(workspace: &Workspace, args: &Value) -> Result<ToolOutcome> {
    let path = required_str(args, "path", "insert_text")?;
    let text = required_str(args, "text", "insert_text")?;
    let line = usize_arg(args, "line").ok_or_else(|| {
        EngineError::InvalidInput("insert_text: missing required argument 'line'".to_string())
    })?;
    let column = usize_arg(args, "column").unwrap_or(1);
    if line == 0 || column == 0 {
        return Err(EngineError::InvalidInput(
            "insert_text: line and column are 1-indexed".to_string(),
        ));
    }

    let resolved = workspace.resolve(path)?;
    let existed = resolved.exists();
    if existed && !resolved.is_file() {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not a file",
            path
        )));
    }

    let mut lines: Vec<String> = if existed {
        let bytes = std::fs::read(&resolved)?;
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(String::from)
            .collect()
    } else {
        Vec::new()
    };

    if line > lines.len() + 1 {
        return Err(EngineError::InvalidInput(format!(
            "insert_text: line {} is past the end of '{}' ({} lines)",
            line,
            path,
            lines.len()
        )));
    }

    if column == 1 {
        lines.insert(line - 1, text.to_string());
    } else {
        if line > lines.len() {
            return Err(EngineError::InvalidInput(format!(
                "insert_text: cannot splice at column {} of nonexistent line {}",
                column, line
            )));
        }
        let target = &mut lines[line - 1];
        let char_count = target.chars().count();
        if column - 1 > char_count {
            return Err(EngineError::InvalidInput(format!(
                "insert_text: column {} is past the end of line {} ({} chars)",
                column, line, char_count
            )));
        }
        let byte_idx = target
            .char_indices()
            .nth(column - 1)
            .map(|(i, _)| i)
            .unwrap_or(target.len());
        target.insert_str(byte_idx, text);
    }

    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(&resolved, content)?;

    let verb = if existed { "updated" } else { "created" };
    Ok(ToolOutcome {
        content: format!("{} '{}'", verb, path),
        created_path: if existed { None } else { Some(path.to_string()) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn router(tmp: &TempDir) -> ToolRouter {
        let ws = Workspace::open(tmp.path()).unwrap();
        ToolRouter::new(ws, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = router(&tmp)
            .dispatch("format_disk", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_list_dir_marks_directories() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        std::fs::write(tmp.path().join(".hidden"), "x").unwrap();

        let out = router(&tmp).dispatch("list_dir", &json!({})).await.unwrap();
        assert_eq!(out.content, "a.txt\nsub/");
    }

    #[tokio::test]
    async fn test_list_dir_empty() {
        let tmp = TempDir::new().unwrap();
        let out = router(&tmp).dispatch("list_dir", &json!({})).await.unwrap();
        assert_eq!(out.content, "(empty directory)");
    }

    #[tokio::test]
    async fn test_read_file_offset_and_prefix() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "one\ntwo\nthree\nfour\nfive\n").unwrap();

        let out = router(&tmp)
            .dispatch("read_file", &json!({"path": "f.txt", "offset": 3, "limit": 2}))
            .await
            .unwrap();
        assert!(out.content.contains("L3: three"));
        assert!(out.content.contains("L4: four"));
        assert!(!out.content.contains("L2:"));
        assert!(!out.content.contains("L5:"));
    }

    #[tokio::test]
    async fn test_read_file_offset_past_end() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "one\n").unwrap();
        let err = router(&tmp)
            .dispatch("read_file", &json!({"path": "f.txt", "offset": 50}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_grep_empty_pattern_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = router(&tmp)
            .dispatch("grep_files", &json!({"pattern": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_grep_case_insensitive_and_no_matches() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.md"), "Hello World\nsecond line\n").unwrap();

        let r = router(&tmp);
        let out = r
            .dispatch("grep_files", &json!({"pattern": "hello"}))
            .await
            .unwrap();
        assert_eq!(out.content, "notes.md:1: Hello World");

        let out = r
            .dispatch("grep_files", &json!({"pattern": "absent"}))
            .await
            .unwrap();
        assert_eq!(out.content, "no matches found");
    }

    #[tokio::test]
    async fn test_grep_scoped_to_subdirectory() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("top.txt"), "needle at top\n").unwrap();
        std::fs::write(tmp.path().join("sub/inner.txt"), "needle below\n").unwrap();

        let out = router(&tmp)
            .dispatch("grep_files", &json!({"pattern": "needle", "path": "sub"}))
            .await
            .unwrap();
        assert!(out.content.contains("sub/inner.txt:1:"));
        assert!(!out.content.contains("top.txt"));
    }

    #[tokio::test]
    async fn test_grep_limit_caps_matches() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("many.txt"), "hit\n".repeat(10)).unwrap();

        let out = router(&tmp)
            .dispatch("grep_files", &json!({"pattern": "hit", "limit": 3}))
            .await
            .unwrap();
        assert_eq!(out.content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_grep_path_cannot_escape() {
        let tmp = TempDir::new().unwrap();
        let err = router(&tmp)
            .dispatch("grep_files", &json!({"pattern": "x", "path": ".."}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_insert_text_creates_file() {
        let tmp = TempDir::new().unwrap();
        let out = router(&tmp)
            .dispatch(
                "insert_text",
                &json!({"path": "new.txt", "line": 1, "text": "hello"}),
            )
            .await
            .unwrap();
        assert_eq!(out.created_path.as_deref(), Some("new.txt"));
        let content = std::fs::read_to_string(tmp.path().join("new.txt")).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[tokio::test]
    async fn test_insert_text_line_past_end() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "a\nb\n").unwrap();
        let err = router(&tmp)
            .dispatch(
                "insert_text",
                &json!({"path": "f.txt", "line": 4, "text": "x"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_insert_text_column_splice() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "abcd\n").unwrap();
        router(&tmp)
            .dispatch(
                "insert_text",
                &json!({"path": "f.txt", "line": 1, "column": 3, "text": "XY"}),
            )
            .await
            .unwrap();
        let content = std::fs::read_to_string(tmp.path().join("f.txt")).unwrap();
        assert_eq!(content, "abXYcd\n");
    }

    #[tokio::test]
    async fn test_escape_is_denied() {
        let tmp = TempDir::new().unwrap();
        let err = router(&tmp)
            .dispatch("read_file", &json!({"path": "../outside.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }

    #[test]
    fn test_tool_definitions_cover_all() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 5);
        assert_eq!(defs[0]["function"]["name"], "list_dir");
        assert_eq!(defs[4]["function"]["name"], "insert_text");
    }
}
