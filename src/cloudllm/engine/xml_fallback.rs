//! XML-tagged tool-call fallback parser (§4.3 step 6).
//!
//! Some providers emit tool calls as `<tool_call>{...}</tool_call>` text instead of native
//! `tool_calls`. This scans assistant content for such tags and synthesizes `NativeToolCall`s
//! for any that name a registered tool and carry a schema-valid JSON payload.

use crate::client_wrapper::NativeToolCall;
use crate::tool_protocol::ToolRegistry;

const TAG_NAMES: [&str; 2] = ["tool_call", "function_call"];

/// Scan `content` for fallback tool-call tags, validating each against `registry`. Returns an
/// empty vector when no tags are present or none validate.
pub fn parse_fallback_tool_calls(content: &str, registry: &ToolRegistry) -> Vec<NativeToolCall> {
    let mut calls = Vec::new();
    let mut counter = 0usize;

    for tag in TAG_NAMES {
        let mut search_from = 0;
        let lower = content.to_lowercase();
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);

        while let Some(open_rel) = lower[search_from..].find(&open) {
            let open_idx = search_from + open_rel;
            let body_start = open_idx + open.len();
            let Some(close_rel) = lower[body_start..].find(&close) else {
                break;
            };
            let body_end = body_start + close_rel;
            let body = &content[body_start..body_end];
            search_from = body_end + close.len();

            let Ok(value) = serde_json::from_str::<serde_json::Value>(body.trim()) else {
                continue;
            };
            let Some(name) = value.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            if !registry.contains(name) {
                continue;
            }
            let args = value
                .get("arguments")
                .or_else(|| value.get("parameters"))
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default()));
            if !registry.validate_no_extra_keys(name, &args) {
                continue;
            }

            counter += 1;
            calls.push(NativeToolCall {
                id: format!("xmltc_{}", counter),
                name: name.to_string(),
                arguments: args,
            });
        }
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_protocol::{Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success(serde_json::json!("ok"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Tool::new(
            ToolMetadata::new("end_subtask", "finish").with_parameter(
                ToolParameter::new("summary", ToolParameterType::String).required(),
            ),
            Arc::new(Echo),
        ));
        r
    }

    #[test]
    fn no_tags_returns_empty() {
        let calls = parse_fallback_tool_calls("just text", &registry());
        assert!(calls.is_empty());
    }

    #[test]
    fn parses_valid_tool_call_tag() {
        let content = r#"Done. <tool_call>{"name": "end_subtask", "arguments": {"summary": "x"}}</tool_call>"#;
        let calls = parse_fallback_tool_calls(content, &registry());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_subtask");
        assert!(calls[0].id.starts_with("xmltc_"));
    }

    #[test]
    fn rejects_unknown_tool_name() {
        let content = r#"<function_call>{"name": "not_registered", "parameters": {}}</function_call>"#;
        assert!(parse_fallback_tool_calls(content, &registry()).is_empty());
    }

    #[test]
    fn rejects_extra_argument_keys() {
        let content = r#"<tool_call>{"name": "end_subtask", "arguments": {"summary": "x", "bogus": 1}}</tool_call>"#;
        assert!(parse_fallback_tool_calls(content, &registry()).is_empty());
    }

    #[test]
    fn rejects_invalid_json() {
        let content = "<tool_call>not json</tool_call>";
        assert!(parse_fallback_tool_calls(content, &registry()).is_empty());
    }

    #[test]
    fn case_insensitive_tag_matching() {
        let content = r#"<TOOL_CALL>{"name": "end_subtask", "arguments": {"summary": "x"}}</TOOL_CALL>"#;
        assert_eq!(parse_fallback_tool_calls(content, &registry()).len(), 1);
    }
}
