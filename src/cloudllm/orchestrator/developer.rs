//! Developer phase (§4.2): works one subtask to an `end_subtask` call, then hands off to QA.

use super::{extract_final_tool_field, qa, terminal_tools, user_message, OrchestratorCtx};
use crate::cancellation::CancellationToken;
use crate::engine::session::{Conversation, Memories};
use crate::engine::{compact_now, continue_conversation, ExitReason};
use crate::error::OrchestratorError;
use crate::ticket::{SubtaskStatus, TicketHolder};
use crate::tool_protocol::ToolRegistry;
use std::sync::Arc;
use tokio::sync::Mutex;

const NUDGE_PROGRESS_CHECK: &str = "You have gone several turns without finishing. Summarize what \
you've done so far, what's left, and keep going — or call end_subtask if the work already satisfies \
the subtask description.";
const CONTEXT_RESET_SEED_SUFFIX: &str = "\n\n(Your previous context was reset after stalling; \
anything you need to remember should already be in Memories below. Continue the subtask.)";

fn build_registry(occ: &OrchestratorCtx) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    crate::tools::shell::register(&mut registry);
    crate::tools::filesystem::register(&mut registry);
    crate::tools::search::register(&mut registry);
    crate::tools::memory::register(&mut registry);
    crate::tools::subagent::register(&mut registry);
    if occ.web_search_enabled() {
        crate::tools::web_search::register(&mut registry);
    }
    terminal_tools::register_developer(&mut registry);
    registry
}

/// Take one subtask from in-progress through an approved `end_subtask`, looping through QA
/// rejections and stuck-counter nudges/resets as needed (§4.2 Developer phase).
pub async fn run_subtask(
    occ: &OrchestratorCtx,
    ticket: &TicketHolder,
    task_id: &str,
    subtask_id: &str,
    memories: Arc<Mutex<Memories>>,
    ct: &CancellationToken,
) -> Result<(), OrchestratorError> {
    mark_subtask_status(occ, ticket, task_id, subtask_id, SubtaskStatus::InProgress).await;

    let system_prompt = occ.render_prompt("developer")?;
    let seed = subtask_seed(ticket, task_id, subtask_id).await;
    let mut conversation = Conversation::new(format!("dev-{}", subtask_id), system_prompt.clone(), seed.clone());
    let registry = build_registry(occ);
    let tool_ctx = occ.build_tool_ctx(ticket, memories.clone(), Some(subtask_id.to_string()), ct);
    let deps = occ.engine_deps(ticket);

    let nudge_threshold = occ.nudge_threshold();
    let reset_threshold = occ.reset_threshold();
    let mut stuck_counter: u32 = 0;

    loop {
        if ct.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let result = continue_conversation(&mut conversation, &memories, &registry, &tool_ctx, &deps, ct).await;

        match result.exit_reason {
            ExitReason::ToolRequestedExit if result.final_tool_name.as_deref() == Some("end_subtask") => {
                let summary = extract_final_tool_field(&conversation, "summary");
                match qa::run(occ, ticket, memories.clone(), subtask_id, &summary, ct).await? {
                    qa::QaOutcome::Approved => {
                        mark_subtask_status(occ, ticket, task_id, subtask_id, SubtaskStatus::Complete).await;
                        compact_now(&mut conversation, &memories, &deps).await;
                        return Ok(());
                    }
                    qa::QaOutcome::Rejected(feedback) => {
                        occ.log_activity(&format!("QA rejected subtask {}: {}", subtask_id, feedback)).await;
                        conversation.push(user_message(format!(
                            "QA rejected this subtask:\n\n{}\n\nAddress the feedback and call end_subtask again once done.",
                            feedback
                        )));
                        stuck_counter = 0;
                    }
                }
            }
            ExitReason::ToolRequestedExit => {}
            ExitReason::Completed | ExitReason::MaxIterationsReached => {
                stuck_counter += 1;
                if stuck_counter == reset_threshold {
                    conversation = Conversation::new(
                        format!("dev-{}", subtask_id),
                        system_prompt.clone(),
                        format!("{}{}", seed, CONTEXT_RESET_SEED_SUFFIX),
                    );
                    stuck_counter = 0;
                } else if stuck_counter == nudge_threshold {
                    conversation.push(user_message(NUDGE_PROGRESS_CHECK));
                }
            }
            ExitReason::CostExceeded => {
                return Err(OrchestratorError::BudgetExceeded);
            }
            ExitReason::Error => {
                return Err(OrchestratorError::Provider(
                    crate::error::ProviderError::AllProvidersExhausted,
                ));
            }
        }
    }
}

async fn subtask_seed(ticket: &TicketHolder, task_id: &str, subtask_id: &str) -> String {
    let t = ticket.get().await;
    let found = t
        .iter_subtasks()
        .find(|(task, subtask)| task.id == task_id && subtask.id == subtask_id);
    match found {
        Some((task, subtask)) => format!(
            "Task: {} — {}\n\nSubtask: {}\n{}",
            task.name, task.description, subtask.name, subtask.description
        ),
        None => format!("Subtask {} (details unavailable)", subtask_id),
    }
}

async fn mark_subtask_status(
    occ: &OrchestratorCtx,
    ticket: &TicketHolder,
    task_id: &str,
    subtask_id: &str,
    status: SubtaskStatus,
) {
    if let Ok(updated) = occ
        .api_client
        .update_subtask_status(&occ.ticket_id, task_id, subtask_id, status)
        .await
    {
        ticket.replace(updated).await;
    }
}
