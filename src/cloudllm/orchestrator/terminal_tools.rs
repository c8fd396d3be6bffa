//! Role-specific terminal tools (§4.2).
//!
//! Each of these tools does nothing but carry information into a [`ToolResult`] marked
//! `is_final` — the actual phase-transition logic lives in the calling phase module, which reads
//! `final_tool_name` and the tool's own structured output off the `LlmResult`.

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry,
    ToolResult,
};
use async_trait::async_trait;
use std::sync::Arc;

struct PlanningComplete;

#[async_trait]
impl ToolHandler for PlanningComplete {
    async fn call(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::success(serde_json::json!({ "acknowledged": true })).finalize("planning_complete")
    }
}

struct EndSubtask;

#[async_trait]
impl ToolHandler for EndSubtask {
    async fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let Some(summary) = args.get("summary").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'summary'");
        };
        ToolResult::success(serde_json::json!({ "summary": summary })).finalize("end_subtask")
    }
}

struct ApproveSubtask;

#[async_trait]
impl ToolHandler for ApproveSubtask {
    async fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let notes = args.get("notes").and_then(|v| v.as_str()).unwrap_or("");
        ToolResult::success(serde_json::json!({ "notes": notes })).finalize("approve_subtask")
    }
}

struct RejectSubtask;

#[async_trait]
impl ToolHandler for RejectSubtask {
    async fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let Some(feedback) = args.get("feedback").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'feedback'");
        };
        ToolResult::success(serde_json::json!({ "feedback": feedback })).finalize("reject_subtask")
    }
}

pub fn register_planning(registry: &mut ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new(
            "planning_complete",
            "Declare the plan finished. Only call this once every task has at least one subtask.",
        ),
        Arc::new(PlanningComplete),
    ));
}

pub fn register_developer(registry: &mut ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("end_subtask", "Finish this subtask and hand it to QA for review.")
            .with_parameter(ToolParameter::new("summary", ToolParameterType::String).required()),
        Arc::new(EndSubtask),
    ));
}

pub fn register_qa(registry: &mut ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("approve_subtask", "Approve the developer's work on this subtask.")
            .with_parameter(ToolParameter::new("notes", ToolParameterType::String)),
        Arc::new(ApproveSubtask),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("reject_subtask", "Reject the developer's work and send it back with feedback.")
            .with_parameter(ToolParameter::new("feedback", ToolParameterType::String).required()),
        Arc::new(RejectSubtask),
    ));
}
