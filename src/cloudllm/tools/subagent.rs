//! Sub-agent spawn tool (§4.4).
//!
//! Delegates a bounded sub-task to a fresh, isolated conversation seeded with the `subagent`
//! prompt role, carrying its own ephemeral `Memories` and a read/explore-oriented tool subset
//! (shell, file, search). Grounded on the teacher's `council::Agent`, which wraps an independent
//! `ClientWrapper` + tool registry per delegate — here there is exactly one delegate per call,
//! spun up and torn down within the handler rather than kept alive as a named participant.

use crate::engine::session::{Conversation, Memories};
use crate::engine::{continue_conversation, EngineDeps, ExitReason};
use crate::settings::CompactionConfig;
use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry,
    ToolResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Hard ceiling on the sub-agent's own tool-call turns, independent of the parent role's budget.
const SUBAGENT_MAX_ITERATIONS: u32 = 15;

fn restricted_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    crate::tools::shell::register(&mut registry);
    crate::tools::filesystem::register(&mut registry);
    crate::tools::search::register(&mut registry);
    registry
}

struct SubagentSpawn;

#[async_trait]
impl ToolHandler for SubagentSpawn {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'task'");
        };
        if ctx.llm_configs.is_empty() {
            return ToolResult::failure("no LLM providers configured for sub-agent spawn");
        }

        let sub_id = format!("subagent-{}", Uuid::new_v4());
        let ct = ctx.cancellation.child();
        let sub_ctx = ToolContext {
            subtask_id: Some(sub_id.clone()),
            memories: Arc::new(Mutex::new(Memories::new())),
            cancellation: ct.clone(),
            ..ctx.clone()
        };

        let mut conversation = Conversation::new(sub_id, ctx.subagent_prompt.as_str(), task);
        let compaction_off = CompactionConfig {
            mode: crate::settings::CompactionMode::None,
            context_size_percent: 1.0,
        };
        let deps = EngineDeps {
            llm_configs: &ctx.llm_configs,
            max_tool_iterations: SUBAGENT_MAX_ITERATIONS,
            compaction: &compaction_off,
            compaction_prompt: "",
            ticket: &ctx.ticket,
            api_client: &ctx.api_client,
            hub_client: &ctx.hub_client,
        };

        let registry = restricted_registry();
        let result = continue_conversation(
            &mut conversation,
            &sub_ctx.memories,
            &registry,
            &sub_ctx,
            &deps,
            &ct,
        )
        .await;

        match result.exit_reason {
            ExitReason::Completed => ToolResult::success(serde_json::json!({ "result": result.content })),
            ExitReason::MaxIterationsReached => ToolResult::success(serde_json::json!({
                "result": "sub-agent reached its iteration limit without finishing",
            })),
            ExitReason::ToolRequestedExit => ToolResult::success(serde_json::json!({
                "result": format!("sub-agent exited via tool '{}'", result.final_tool_name.unwrap_or_default()),
            })),
            ExitReason::CostExceeded => ToolResult::failure("sub-agent aborted: ticket budget exceeded"),
            ExitReason::Error => ToolResult::failure(format!(
                "sub-agent failed: {}",
                result.error_message.unwrap_or_else(|| "unknown error".to_string())
            )),
        }
    }
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new(
            "subagent_spawn",
            "Delegate a bounded, self-contained task to an isolated sub-agent and return its result.",
        )
        .with_parameter(ToolParameter::new("task", ToolParameterType::String).required()),
        Arc::new(SubagentSpawn),
    ));
}
