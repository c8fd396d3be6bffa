//! Agent Orchestrator: the phase state machine described in §4.2.
//!
//! [`start_agents`] is the module's entire public contract. It drives a single ticket through
//! Planning, then Developer/QA per subtask in order, emitting activity-log entries at every
//! phase boundary and leaving the ticket `done` or `failed` — never `active` (that transition
//! belongs to whatever moved the ticket into active-work in the first place).

mod developer;
mod planning;
mod qa;
mod terminal_tools;

use crate::api_client::ApiClient;
use crate::cancellation::CancellationToken;
use crate::engine::session::Memories;
use crate::engine::EngineDeps;
use crate::error::OrchestratorError;
use crate::hub_client::HubClient;
use crate::settings::{LLMConfig, Prompts, Settings, WebSearchConfig};
use crate::ticket::TicketHolder;
use crate::tool_protocol::ToolContext;
use crate::tools::shell::PersistentShellTable;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared, read-only state threaded through every phase of one `start_agents` run.
#[derive(Clone)]
pub struct OrchestratorCtx {
    pub settings: Settings,
    pub prompts: Prompts,
    pub api_client: Arc<ApiClient>,
    pub hub_client: Arc<HubClient>,
    pub workspace_dir: PathBuf,
    pub repo_dir: String,
    pub ticket_id: String,
    pub current_date: String,
    llm_configs: Arc<Vec<LLMConfig>>,
    web_search: Arc<WebSearchConfig>,
    persistent_shells: PersistentShellTable,
    /// Rendered once at construction; the Engine borrows this for the lifetime of each
    /// `continue_conversation`/`compact_now` call (§4.3.1).
    compaction_prompt: String,
}

impl OrchestratorCtx {
    pub fn new(
        settings: Settings,
        prompts: Prompts,
        api_client: Arc<ApiClient>,
        hub_client: Arc<HubClient>,
        workspace_dir: PathBuf,
        repo_dir: String,
        ticket_id: String,
        current_date: String,
    ) -> Self {
        let llm_configs = Arc::new(settings.llm_configs.clone());
        let web_search = Arc::new(settings.web_search.clone());
        let compaction_prompt = prompts
            .render("compaction", &repo_dir, &current_date, &ticket_id)
            .unwrap_or_default();
        Self {
            settings,
            prompts,
            api_client,
            hub_client,
            workspace_dir,
            repo_dir,
            ticket_id,
            current_date,
            llm_configs,
            web_search,
            persistent_shells: PersistentShellTable::new(),
            compaction_prompt,
        }
    }

    /// Render a role's prompt template with this run's substitutions (§4.2 Planning phase).
    fn render_prompt(&self, role: &str) -> Result<String, OrchestratorError> {
        self.prompts
            .render(role, &self.repo_dir, &self.current_date, &self.ticket_id)
            .ok_or_else(|| {
                OrchestratorError::Config(crate::error::ConfigError::MissingPrompt(role.to_string()))
            })
    }

    fn build_tool_ctx(
        &self,
        ticket: &TicketHolder,
        memories: Arc<Mutex<Memories>>,
        subtask_id: Option<String>,
        ct: &CancellationToken,
    ) -> ToolContext {
        ToolContext {
            workspace_dir: self.workspace_dir.clone(),
            ticket: ticket.clone(),
            api_client: self.api_client.clone(),
            hub_client: self.hub_client.clone(),
            memories,
            persistent_shells: self.persistent_shells.clone(),
            cancellation: ct.child(),
            subtask_id,
            web_search: self.web_search.clone(),
            llm_configs: self.llm_configs.clone(),
            subagent_prompt: Arc::new(self.render_prompt("subagent").unwrap_or_default()),
        }
    }

    fn web_search_enabled(&self) -> bool {
        self.web_search.enabled
    }

    fn nudge_threshold(&self) -> u32 {
        self.settings.orchestrator.nudge_threshold
    }

    fn reset_threshold(&self) -> u32 {
        self.settings.orchestrator.reset_threshold
    }

    fn engine_deps<'a>(&'a self, ticket: &'a TicketHolder) -> EngineDeps<'a> {
        EngineDeps {
            llm_configs: &self.llm_configs,
            max_tool_iterations: self.settings.orchestrator.max_tool_iterations,
            compaction: &self.settings.compaction,
            compaction_prompt: &self.compaction_prompt,
            ticket,
            api_client: &self.api_client,
            hub_client: &self.hub_client,
        }
    }

    async fn log_activity(&self, message: &str) {
        let _ = self.api_client.post_activity(&self.ticket_id, message).await;
    }

    async fn mark_failed(&self, ticket: &TicketHolder, reason: &str) {
        log::warn!("orchestrator: ticket {} failed: {}", self.ticket_id, reason);
        self.log_activity(&format!("Failed: {}", reason)).await;
        if let Ok(updated) = self.api_client.set_status(&self.ticket_id, "failed").await {
            ticket.replace(updated).await;
        }
    }

    async fn mark_done(&self, ticket: &TicketHolder) {
        self.log_activity("All subtasks complete").await;
        if let Ok(updated) = self.api_client.set_status(&self.ticket_id, "done").await {
            ticket.replace(updated).await;
        }
    }
}

/// Drive `ticket` through Planning, then Developer/QA per subtask (§4.2).
///
/// Runs synchronously until planning blocks, every subtask resolves, cancellation is observed,
/// or a fatal LLM failure occurs. Transitions the ticket to `done` on full success or `failed`
/// on any terminal error; never sets it `active` (the caller already did that).
pub async fn start_agents(
    occ: OrchestratorCtx,
    ticket: TicketHolder,
    ct: &CancellationToken,
) -> Result<(), OrchestratorError> {
    occ.log_activity("Planning started").await;
    if let Err(e) = planning::run(&occ, &ticket, ct).await {
        if !matches!(e, OrchestratorError::Cancelled) {
            occ.mark_failed(&ticket, &e.to_string()).await;
        }
        return Err(e);
    }
    occ.log_activity("Planning complete.").await;

    let subtasks: Vec<(String, String, String)> = {
        let t = ticket.get().await;
        t.iter_subtasks()
            .map(|(task, subtask)| (task.id.clone(), subtask.id.clone(), subtask.name.clone()))
            .collect()
    };

    // One Memories handle for the whole ticket's Developer phase: it carries forward across
    // subtasks and is shared (not copied) into each subtask's QA review (§4.2 Developer phase).
    let developer_memories = Arc::new(Mutex::new(Memories::new()));

    for (task_id, subtask_id, subtask_name) in subtasks {
        if ct.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let already_done = {
            let t = ticket.get().await;
            t.iter_subtasks().any(|(task, subtask)| {
                task.id == task_id
                    && subtask.id == subtask_id
                    && subtask.status == crate::ticket::SubtaskStatus::Complete
            })
        };
        if already_done {
            continue;
        }

        occ.log_activity(&format!("Starting subtask {}", subtask_id)).await;
        match developer::run_subtask(
            &occ,
            &ticket,
            &task_id,
            &subtask_id,
            developer_memories.clone(),
            ct,
        )
        .await
        {
            Ok(()) => {
                occ.log_activity(&format!("Subtask completed: {}", subtask_name)).await;
            }
            Err(e) => {
                if !matches!(e, OrchestratorError::Cancelled) {
                    occ.mark_failed(&ticket, &e.to_string()).await;
                }
                return Err(e);
            }
        }
    }

    occ.mark_done(&ticket).await;
    Ok(())
}

fn user_message(text: impl Into<std::sync::Arc<str>>) -> crate::client_wrapper::Message {
    crate::client_wrapper::Message {
        role: crate::client_wrapper::Role::User,
        content: text.into(),
        tool_calls: vec![],
    }
}

/// Pull a named field out of the most recent history entry, which is the terminal tool's own
/// result message (pushed by the Engine just before it returns `tool_requested_exit`). Falls
/// back to the raw message text when it isn't the JSON object the terminal tools emit.
fn extract_final_tool_field(conversation: &crate::engine::session::Conversation, field: &str) -> String {
    let Some(last) = conversation.history().last() else {
        return String::new();
    };
    let text = last.content.to_string();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get(field).and_then(|f| f.as_str()).map(|s| s.to_string()))
        .unwrap_or(text)
}
