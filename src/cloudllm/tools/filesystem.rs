//! `file.read` / `file.write` / `file.edit` / `file.ls` (§4.4).
//!
//! Path containment is grounded on the teacher's `FileSystemTool::validate_path`: reject
//! absolute paths, resolve `.`/`..` components relative to the workspace root, then canonicalize
//! and reject anything that escapes the root (including through an existing ancestor, to catch
//! symlink traversal on paths that don't exist yet).

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn resolve_path(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_buf = PathBuf::from(requested);
    if requested_buf.is_absolute() {
        return Err("absolute paths are not allowed".to_string());
    }

    let mut normalized = PathBuf::new();
    for component in requested_buf.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(c) => normalized.push(c),
            _ => {}
        }
    }

    let effective = root.join(&normalized);
    let root_canonical = root
        .canonicalize()
        .map_err(|e| format!("cannot canonicalize workspace root: {}", e))?;

    let canonical_to_check = if effective.exists() {
        effective
            .canonicalize()
            .map_err(|e| format!("cannot canonicalize path: {}", e))?
    } else {
        let parent = effective
            .parent()
            .ok_or_else(|| "path has no parent".to_string())?;
        let mut ancestor = parent;
        let canonical_ancestor = loop {
            if ancestor.exists() {
                break ancestor
                    .canonicalize()
                    .map_err(|e| format!("cannot canonicalize ancestor: {}", e))?;
            }
            ancestor = ancestor
                .parent()
                .ok_or_else(|| "no existing ancestor found".to_string())?;
        };
        let suffix = effective.strip_prefix(ancestor).unwrap_or(&effective);
        canonical_ancestor.join(suffix)
    };

    if !canonical_to_check.starts_with(&root_canonical) {
        return Err(format!("path escapes workspace root: {}", requested));
    }

    Ok(effective)
}

struct FileRead;

#[async_trait]
impl ToolHandler for FileRead {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'path'");
        };
        let offset = args.get("offset").and_then(|v| v.as_i64());
        let lines = args.get("lines").and_then(|v| v.as_i64());

        let resolved = match resolve_path(&ctx.workspace_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("cannot read '{}': {}", path, e)),
        };

        let use_raw = matches!(offset, None | Some(0)) && matches!(lines, None | Some(0));
        if use_raw {
            return ToolResult::success(serde_json::json!(content));
        }

        if offset.is_some_and(|o| o < 0) || lines.is_some_and(|l| l < 0) {
            return ToolResult::failure("offset and lines must be non-negative");
        }

        let all_lines: Vec<&str> = content.lines().collect();
        let total = all_lines.len();
        let start = (offset.unwrap_or(0) as usize).min(total);
        let count = lines.unwrap_or((total - start) as i64).max(0) as usize;
        let end = (start + count).min(total);

        let mut out = format!("Lines {}-{} of {}\n", start + 1, end, total);
        for (i, line) in all_lines[start..end].iter().enumerate() {
            out.push_str(&format!("{}: {}\n", start + i + 1, line));
        }
        ToolResult::success(serde_json::json!(out))
    }
}

struct FileWrite;

#[async_trait]
impl ToolHandler for FileWrite {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(path), Some(content)) = (
            args.get("path").and_then(|v| v.as_str()),
            args.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'path'/'content'");
        };
        let resolved = match resolve_path(&ctx.workspace_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::failure(format!("cannot create parent directories: {}", e));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult::success(serde_json::json!({ "written": true })),
            Err(e) => ToolResult::failure(format!("cannot write '{}': {}", path, e)),
        }
    }
}

struct FileEdit;

#[async_trait]
impl ToolHandler for FileEdit {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(path), Some(old_content), Some(new_content)) = (
            args.get("path").and_then(|v| v.as_str()),
            args.get("oldContent").and_then(|v| v.as_str()),
            args.get("newContent").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'path'/'oldContent'/'newContent'");
        };
        if old_content.is_empty() {
            return ToolResult::failure("oldContent must not be empty");
        }

        let resolved = match resolve_path(&ctx.workspace_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("cannot read '{}': {}", path, e)),
        };

        let matches = content.matches(old_content).count();
        if matches == 0 {
            return ToolResult::failure("oldContent did not match anywhere in the file");
        }
        if matches > 1 {
            return ToolResult::failure(format!(
                "oldContent matched {} times; it must match exactly once",
                matches
            ));
        }

        let updated = content.replacen(old_content, new_content, 1);
        match tokio::fs::write(&resolved, updated).await {
            Ok(()) => ToolResult::success(serde_json::json!({ "edited": true })),
            Err(e) => ToolResult::failure(format!("cannot write '{}': {}", path, e)),
        }
    }
}

struct FileLs;

#[async_trait]
impl ToolHandler for FileLs {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match resolve_path(&ctx.workspace_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("cannot list '{}': {}", path, e)),
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    let name = entry.file_name().to_string_lossy().to_string();
                    names.push(if is_dir { format!("{}/", name) } else { name });
                }
                Ok(None) => break,
                Err(e) => return ToolResult::failure(format!("cannot list '{}': {}", path, e)),
            }
        }
        names.sort();
        ToolResult::success(serde_json::json!(names))
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("file_read", "Read a file, optionally a numbered-line slice.")
            .with_parameter(ToolParameter::new("path", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("offset", ToolParameterType::Integer))
            .with_parameter(ToolParameter::new("lines", ToolParameterType::Integer)),
        Arc::new(FileRead),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("file_write", "Write a file, creating intermediate directories.")
            .with_parameter(ToolParameter::new("path", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("content", ToolParameterType::String).required()),
        Arc::new(FileWrite),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("file_edit", "Replace a single unique substring match in a file.")
            .with_parameter(ToolParameter::new("path", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("oldContent", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("newContent", ToolParameterType::String).required()),
        Arc::new(FileEdit),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("file_ls", "List directory entries.")
            .with_parameter(ToolParameter::new("path", ToolParameterType::String)),
        Arc::new(FileLs),
    ));
}
