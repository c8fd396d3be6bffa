//! Ticket mutation tools: `add_task`, `add_subtask`, `update_subtask`, `delete_all_tasks` (§4.4).
//!
//! These forward to the control-plane via `ToolContext.api_client` and, on success, replace the
//! shared `TicketHolder` with the server's returned ticket — the single writer discipline is the
//! server's response, never a locally mutated copy (§5).

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

struct AddTask;

#[async_trait]
impl ToolHandler for AddTask {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(name), Some(description)) = (
            args.get("name").and_then(|v| v.as_str()),
            args.get("description").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'name'/'description'");
        };
        let task = crate::ticket::Task {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            subtasks: vec![],
        };
        let ticket_id = ctx.ticket.get().await.id;
        match ctx.api_client.add_task(&ticket_id, &task).await {
            Ok(updated) => {
                ctx.ticket.replace(updated).await;
                ToolResult::success(serde_json::json!({ "taskId": task.id }))
            }
            Err(e) => ToolResult::failure(format!("failed to add task: {}", e)),
        }
    }
}

struct AddSubtask;

#[async_trait]
impl ToolHandler for AddSubtask {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(task_id), Some(name), Some(description)) = (
            args.get("taskId").and_then(|v| v.as_str()),
            args.get("name").and_then(|v| v.as_str()),
            args.get("description").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'taskId'/'name'/'description'");
        };
        let subtask = crate::ticket::Subtask::new(Uuid::new_v4().to_string(), name, description);
        let ticket_id = ctx.ticket.get().await.id;
        match ctx.api_client.add_subtask(&ticket_id, task_id, &subtask).await {
            Ok(updated) => {
                ctx.ticket.replace(updated).await;
                ToolResult::success(serde_json::json!({ "subtaskId": subtask.id }))
            }
            Err(e) => ToolResult::failure(format!("failed to add subtask: {}", e)),
        }
    }
}

struct UpdateSubtask;

#[async_trait]
impl ToolHandler for UpdateSubtask {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let (Some(task_id), Some(subtask_id), Some(status_str)) = (
            args.get("taskId").and_then(|v| v.as_str()),
            args.get("subtaskId").and_then(|v| v.as_str()),
            args.get("status").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required arguments 'taskId'/'subtaskId'/'status'");
        };
        let status = match status_str {
            "incomplete" => crate::ticket::SubtaskStatus::Incomplete,
            "in-progress" => crate::ticket::SubtaskStatus::InProgress,
            "awaiting-review" => crate::ticket::SubtaskStatus::AwaitingReview,
            "complete" => crate::ticket::SubtaskStatus::Complete,
            "rejected" => crate::ticket::SubtaskStatus::Rejected,
            other => return ToolResult::failure(format!("unknown status '{}'", other)),
        };
        let ticket_id = ctx.ticket.get().await.id;
        match ctx
            .api_client
            .update_subtask_status(&ticket_id, task_id, subtask_id, status)
            .await
        {
            Ok(updated) => {
                ctx.ticket.replace(updated).await;
                ToolResult::success(serde_json::json!({ "updated": true }))
            }
            Err(e) => ToolResult::failure(format!("failed to update subtask: {}", e)),
        }
    }
}

struct DeleteAllTasks;

#[async_trait]
impl ToolHandler for DeleteAllTasks {
    async fn call(&self, _args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let ticket_id = ctx.ticket.get().await.id;
        match ctx.api_client.delete_all_tasks(&ticket_id).await {
            Ok(updated) => {
                ctx.ticket.replace(updated).await;
                ToolResult::success(serde_json::json!({ "deleted": true }))
            }
            Err(e) => ToolResult::failure(format!("failed to delete tasks: {}", e)),
        }
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("add_task", "Add a task to the ticket's plan.")
            .with_parameter(ToolParameter::new("name", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("description", ToolParameterType::String).required()),
        Arc::new(AddTask),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("add_subtask", "Add a subtask under an existing task.")
            .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("name", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("description", ToolParameterType::String).required()),
        Arc::new(AddSubtask),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("update_subtask", "Change a subtask's status.")
            .with_parameter(ToolParameter::new("taskId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("subtaskId", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("status", ToolParameterType::String).required()),
        Arc::new(UpdateSubtask),
    ));
    registry.register(Tool::new(
        ToolMetadata::new("delete_all_tasks", "Discard the entire plan and start over."),
        Arc::new(DeleteAllTasks),
    ));
}
