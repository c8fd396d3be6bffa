//! Planning phase (§4.2).

use super::{terminal_tools, user_message, OrchestratorCtx};
use crate::cancellation::CancellationToken;
use crate::engine::session::{Conversation, Memories};
use crate::engine::{continue_conversation, ExitReason};
use crate::error::OrchestratorError;
use crate::ticket::TicketHolder;
use crate::tool_protocol::ToolRegistry;
use std::sync::Arc;
use tokio::sync::Mutex;

const NUDGE_CONTINUE_PLANNING: &str = "Continue planning: call add_task/add_subtask until every \
task has at least one subtask, then call planning_complete.";
const NUDGE_PLAN_INCOMPLETE: &str = "planning_complete was called but the plan is not yet valid — \
every task must have at least one subtask. Add the missing subtasks, then call planning_complete again.";

fn build_registry(occ: &OrchestratorCtx) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    crate::tools::shell::register(&mut registry);
    crate::tools::filesystem::register(&mut registry);
    crate::tools::search::register(&mut registry);
    crate::tools::ticket::register(&mut registry);
    crate::tools::memory::register(&mut registry);
    if occ.web_search_enabled() {
        crate::tools::web_search::register(&mut registry);
    }
    terminal_tools::register_planning(&mut registry);
    registry
}

/// Run the Planning phase to completion: exits only once `planning_complete` has been called
/// with a ticket that has a valid plan (§3), on cancellation, or on a fatal LLM failure.
pub async fn run(
    occ: &OrchestratorCtx,
    ticket: &TicketHolder,
    ct: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let system_prompt = occ.render_prompt("planning")?;
    let t = ticket.get().await;
    let seed = format!("Ticket: {}\n\n{}", t.title, t.description);
    drop(t);

    let mut conversation = Conversation::new(format!("planning-{}", occ.ticket_id), system_prompt, seed);
    let memories = Arc::new(Mutex::new(Memories::new()));
    let registry = build_registry(occ);
    let tool_ctx = occ.build_tool_ctx(ticket, memories.clone(), None, ct);
    let deps = occ.engine_deps(ticket);

    loop {
        if ct.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let result = continue_conversation(&mut conversation, &memories, &registry, &tool_ctx, &deps, ct).await;

        match result.exit_reason {
            ExitReason::ToolRequestedExit if result.final_tool_name.as_deref() == Some("planning_complete") => {
                if ticket.get().await.has_valid_plan() {
                    return Ok(());
                }
                conversation.push(user_message(NUDGE_PLAN_INCOMPLETE));
            }
            ExitReason::ToolRequestedExit => {
                // No other tool in this phase's registry is terminal; treat as a normal turn.
            }
            ExitReason::Completed => {
                conversation.push(user_message(NUDGE_CONTINUE_PLANNING));
            }
            ExitReason::MaxIterationsReached => {
                conversation.push(user_message(NUDGE_CONTINUE_PLANNING));
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
