//! QA phase (§4.2): reviews a developer's `end_subtask` summary and approves or rejects it.

use super::{extract_final_tool_field, terminal_tools, user_message, OrchestratorCtx};
use crate::cancellation::CancellationToken;
use crate::engine::session::{Conversation, Memories};
use crate::engine::{continue_conversation, ExitReason};
use crate::error::OrchestratorError;
use crate::ticket::TicketHolder;
use crate::tool_protocol::ToolRegistry;
use std::sync::Arc;
use tokio::sync::Mutex;

const NUDGE_DECIDE: &str = "Review the developer's summary against the repository and call either \
approve_subtask or reject_subtask.";
const COST_EXCEEDED_FEEDBACK: &str =
    "QA could not complete: the ticket's cost budget was exhausted during review. Treating as rejected.";

pub enum QaOutcome {
    Approved,
    Rejected(String),
}

fn build_registry(occ: &OrchestratorCtx) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    crate::tools::shell::register(&mut registry);
    crate::tools::filesystem::register(&mut registry);
    crate::tools::search::register(&mut registry);
    if occ.web_search_enabled() {
        crate::tools::web_search::register(&mut registry);
    }
    terminal_tools::register_qa(&mut registry);
    registry
}

/// Review one subtask. `memories` is the developer's own `Memories` handle, shared rather than
/// copied, so anything QA hoists is visible back in the developer conversation too.
pub async fn run(
    occ: &OrchestratorCtx,
    ticket: &TicketHolder,
    memories: Arc<Mutex<Memories>>,
    subtask_id: &str,
    developer_summary: &str,
    ct: &CancellationToken,
) -> Result<QaOutcome, OrchestratorError> {
    let system_prompt = occ.render_prompt("qualityassurance")?;
    let seed = format!(
        "Subtask {} — developer's summary:\n\n{}",
        subtask_id, developer_summary
    );
    let mut conversation = Conversation::new(format!("qa-{}", subtask_id), system_prompt, seed);
    let registry = build_registry(occ);
    let tool_ctx = occ.build_tool_ctx(ticket, memories.clone(), Some(subtask_id.to_string()), ct);
    let deps = occ.engine_deps(ticket);

    let mut nudged = false;
    loop {
        if ct.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let result = continue_conversation(&mut conversation, &memories, &registry, &tool_ctx, &deps, ct).await;

        match result.exit_reason {
            ExitReason::ToolRequestedExit if result.final_tool_name.as_deref() == Some("approve_subtask") => {
                return Ok(QaOutcome::Approved);
            }
            ExitReason::ToolRequestedExit if result.final_tool_name.as_deref() == Some("reject_subtask") => {
                let feedback = extract_final_tool_field(&conversation, "feedback");
                return Ok(QaOutcome::Rejected(feedback));
            }
            ExitReason::ToolRequestedExit => {}
            ExitReason::Completed | ExitReason::MaxIterationsReached => {
                if nudged {
                    return Ok(QaOutcome::Rejected(
                        "QA did not reach a decision within its turn budget; sending back for another pass."
                            .to_string(),
                    ));
                }
                nudged = true;
                conversation.push(user_message(NUDGE_DECIDE));
            }
            ExitReason::CostExceeded => {
                return Ok(QaOutcome::Rejected(COST_EXCEEDED_FEEDBACK.to_string()));
            }
            ExitReason::Error => {
                return Err(OrchestratorError::Provider(
                    crate::error::ProviderError::AllProvidersExhausted,
                ));
            }
        }
    }
}
