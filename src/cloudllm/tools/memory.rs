//! `memory.add` / `memory.remove` (§4.4), thin adapters over [`Memories`].

use crate::engine::session::Memories;
use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use std::sync::Arc;

struct MemoryAdd;

#[async_trait]
impl ToolHandler for MemoryAdd {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(label), Some(text)) = (
            args.get("label").and_then(|v| v.as_str()),
            args.get("text").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'label'/'text'");
        };
        let mut memories = ctx.memories.lock().await;
        memories.add(label, text);
        ToolResult::success(serde_json::json!({ "added": true }))
    }
}

struct MemoryRemove;

#[async_trait]
impl ToolHandler for MemoryRemove {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(label), Some(prefix)) = (
            args.get("label").and_then(|v| v.as_str()),
            args.get("prefix").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'label'/'prefix'");
        };
        if prefix.len() < crate::engine::session::MIN_REMOVE_PREFIX_LEN {
            return ToolResult::failure(format!(
                "prefix must be at least {} characters",
                crate::engine::session::MIN_REMOVE_PREFIX_LEN
            ));
        }
        let mut memories = ctx.memories.lock().await;
        let removed = memories.remove(label, prefix);
        ToolResult::success(serde_json::json!({ "removed": removed }))
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("memory_add", "Hoist a labelled note into Memories.")
            .with_parameter(ToolParameter::new("label", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("text", ToolParameterType::String).required()),
        Arc::new(MemoryAdd),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("memory_remove", "Remove notes under a label matching a prefix.")
            .with_parameter(ToolParameter::new("label", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("prefix", ToolParameterType::String).required()),
        Arc::new(MemoryRemove),
    ));
}
