//! `search.glob` and `search.grep` (§4.4).
//!
//! No native regex crate is pulled in for this worker's dependency surface, so glob matching is
//! implemented as a small hand-rolled translator producing a matcher closure rather than an
//! actual `regex::Regex` — it only needs to support the glob grammar named in the spec (`**`,
//! `*`, `?`, `{a,b}`), not arbitrary regular expressions.

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Compile a shell glob into a matcher over `/`-separated relative paths.
///
/// `**` crosses directory boundaries, `*` does not, `?` matches exactly one character, and
/// `{a,b,c}` is a literal alternation.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    for alt in expand_braces(pattern) {
        if glob_match_single(&alt, candidate) {
            return true;
        }
    }
    false
}

fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(open) = pattern.find('{') {
        if let Some(close) = pattern[open..].find('}') {
            let close = open + close;
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            let mut out = Vec::new();
            for option in pattern[open + 1..close].split(',') {
                for rest in expand_braces(suffix) {
                    out.push(format!("{}{}{}", prefix, option, rest));
                }
            }
            return out;
        }
    }
    vec![pattern.to_string()]
}

fn glob_match_single(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    matches_from(&p, 0, &c, 0)
}

fn matches_from(p: &[char], pi: usize, c: &[char], ci: usize) -> bool {
    if pi == p.len() {
        return ci == c.len();
    }
    if p[pi] == '*' && pi + 1 < p.len() && p[pi + 1] == '*' {
        // `**` matches across `/` boundaries, including zero segments.
        let mut next_pi = pi + 2;
        if next_pi < p.len() && p[next_pi] == '/' {
            next_pi += 1;
        }
        for split in ci..=c.len() {
            if matches_from(p, next_pi, c, split) {
                return true;
            }
        }
        return false;
    }
    if p[pi] == '*' {
        for split in ci..=c.len() {
            if c[ci..split].contains(&'/') {
                break;
            }
            if matches_from(p, pi + 1, c, split) {
                return true;
            }
        }
        return false;
    }
    if p[pi] == '?' {
        if ci < c.len() && c[ci] != '/' {
            return matches_from(p, pi + 1, c, ci + 1);
        }
        return false;
    }
    if ci < c.len() && c[ci] == p[pi] {
        return matches_from(p, pi + 1, c, ci + 1);
    }
    false
}

fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().map(|n| n == ".git").unwrap_or(false) {
                continue;
            }
            walk(&path, root, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
}

struct SearchGlob;

#[async_trait]
impl ToolHandler for SearchGlob {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'pattern'");
        };
        let mut all = Vec::new();
        walk(&ctx.workspace_dir, &ctx.workspace_dir, &mut all);
        let matches: Vec<String> = all
            .into_iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .filter(|rel| glob_match(pattern, rel))
            .collect();
        ToolResult::success(serde_json::json!(matches))
    }
}

struct SearchGrep;

#[async_trait]
impl ToolHandler for SearchGrep {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'query'");
        };
        let mode = args.get("mode").and_then(|v| v.as_str()).unwrap_or("files_with_matches");
        let case_sensitive = args.get("caseSensitive").and_then(|v| v.as_bool()).unwrap_or(true);
        let include_glob = args.get("includeGlob").and_then(|v| v.as_str());
        let context_lines = args.get("contextLines").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let max_results = args.get("maxResults").and_then(|v| v.as_u64()).unwrap_or(200) as usize;

        let needle = if case_sensitive { query.to_string() } else { query.to_lowercase() };

        let mut files = Vec::new();
        walk(&ctx.workspace_dir, &ctx.workspace_dir, &mut files);

        let mut files_with_matches = Vec::new();
        let mut content_hits = Vec::new();
        let mut total_count = 0usize;

        'files: for rel in &files {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if let Some(glob) = include_glob {
                if !glob_match(glob, &rel_str) {
                    continue;
                }
            }
            let Ok(text) = std::fs::read_to_string(ctx.workspace_dir.join(rel)) else {
                continue;
            };
            let lines: Vec<&str> = text.lines().collect();
            let mut matched_in_file = false;

            for (i, line) in lines.iter().enumerate() {
                let haystack = if case_sensitive { line.to_string() } else { line.to_lowercase() };
                if haystack.contains(&needle) {
                    matched_in_file = true;
                    total_count += 1;
                    if mode == "content" && content_hits.len() < max_results {
                        let start = i.saturating_sub(context_lines);
                        let end = (i + context_lines + 1).min(lines.len());
                        let snippet = lines[start..end].join("\n");
                        content_hits.push(serde_json::json!({
                            "path": rel_str,
                            "line": i + 1,
                            "snippet": snippet,
                        }));
                    }
                    if files_with_matches.len() >= max_results && mode == "files_with_matches" {
                        break 'files;
                    }
                }
            }
            if matched_in_file && mode == "files_with_matches" {
                files_with_matches.push(rel_str);
            }
        }

        match mode {
            "content" => ToolResult::success(serde_json::json!(content_hits)),
            "count" => ToolResult::success(serde_json::json!({ "count": total_count })),
            _ => ToolResult::success(serde_json::json!(files_with_matches)),
        }
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("search_glob", "Find files matching a shell glob pattern.")
            .with_parameter(ToolParameter::new("pattern", ToolParameterType::String).required()),
        Arc::new(SearchGlob),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("search_grep", "Search file contents for a query.")
            .with_parameter(ToolParameter::new("query", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("mode", ToolParameterType::String))
            .with_parameter(ToolParameter::new("includeGlob", ToolParameterType::String))
            .with_parameter(ToolParameter::new("caseSensitive", ToolParameterType::Boolean))
            .with_parameter(ToolParameter::new("contextLines", ToolParameterType::Integer))
            .with_parameter(ToolParameter::new("maxResults", ToolParameterType::Integer)),
        Arc::new(SearchGrep),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_does_not_cross_directories() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(!glob_match("*.rs", "src/main.rs"));
    }

    #[test]
    fn double_star_crosses_directories() {
        assert!(glob_match("**/*.rs", "src/lib/mod.rs"));
        assert!(glob_match("**/*.rs", "main.rs"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
    }

    #[test]
    fn brace_alternation() {
        assert!(glob_match("*.{rs,toml}", "Cargo.toml"));
        assert!(glob_match("*.{rs,toml}", "lib.rs"));
        assert!(!glob_match("*.{rs,toml}", "README.md"));
    }
}
