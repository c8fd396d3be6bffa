//! Worker Supervisor: the reactive outer loop described in §4.1.
//!
//! [`run`] is the process entrypoint below `main`: it loads configuration, waits for the ticket
//! to exist, bootstraps a workspace, and drives the Agent Orchestrator through to completion,
//! reacting to a ticket leaving the active state by cancelling the in-flight run.

use crate::api_client::ApiClient;
use crate::cancellation::CancellationToken;
use crate::hub_client::HubClient;
use crate::orchestrator::{self, OrchestratorCtx};
use crate::settings::{Prompts, Settings};
use crate::ticket::TicketHolder;
use crate::workspace::Workspace;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait between `get_ticket` polls while the ticket hasn't appeared yet (§4.1 step 3).
const TICKET_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RunArgs<'a> {
    pub ticket_id: &'a str,
    pub server_url: &'a str,
    pub repo_root: &'a Path,
    pub settings_path: &'a Path,
    pub prompts_dir: &'a Path,
}

/// Run one ticket to completion (or until the process is interrupted). Returns the process exit
/// code (§6): 0 on clean shutdown, 1 on fatal configuration/startup failure.
pub async fn run(args: RunArgs<'_>) -> i32 {
    let settings = match Settings::load_from_file(args.settings_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("supervisor: failed to load settings: {}", e);
            return 1;
        }
    };
    let prompts = match Prompts::load_from_dir(args.prompts_dir) {
        Ok(p) => p,
        Err(e) => {
            log::error!("supervisor: failed to load prompts: {}", e);
            return 1;
        }
    };

    let api_client = Arc::new(ApiClient::new(args.server_url));
    let hub_client = HubClient::new(args.server_url);
    if let Err(e) = hub_client.connect(args.ticket_id).await {
        log::error!("supervisor: failed to connect to control plane: {}", e);
        return 1;
    }

    let process_ct = CancellationToken::new();
    tokio::spawn({
        let process_ct = process_ct.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("supervisor: interrupt received, cancelling active work");
            process_ct.cancel();
        }
    });

    let ticket = match wait_for_ticket(&api_client, args.ticket_id, &process_ct).await {
        Some(t) => t,
        None => return 0,
    };

    let workspace_dir = args.repo_root.join(args.ticket_id);
    let (workspace, branch, existed_remotely) =
        match Workspace::bootstrap(&workspace_dir, &settings.git_config, args.ticket_id).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("supervisor: workspace bootstrap failed: {}", e);
                let _ = api_client.set_status(args.ticket_id, "failed").await;
                return 1;
            }
        };
    if !existed_remotely {
        if let Err(e) = api_client.set_branch(args.ticket_id, &branch).await {
            log::warn!("supervisor: failed to publish new branch name: {}", e);
        }
    }

    let repo_dir = workspace
        .dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.ticket_id.to_string());
    let current_date = chrono::Utc::now().format("%Y-%m-%d").to_string();

    let ticket_holder = TicketHolder::new(ticket);

    let occ = OrchestratorCtx::new(
        settings,
        prompts,
        api_client.clone(),
        hub_client.clone(),
        workspace.dir.clone(),
        repo_dir,
        args.ticket_id.to_string(),
        current_date,
    );

    // Reactive loop (§4.1 step 6): status transitions are externally driven, the worker only
    // reacts. Every wake re-fetches the ticket and enters an active-work scope only if it is
    // already `active`; the scope tears down (completion, failure, or the ticket leaving active
    // via `on_ticket_updated` cancelling the bound token) and the loop goes back to waiting.
    loop {
        if process_ct.is_cancelled() {
            break;
        }

        match api_client.get_ticket(args.ticket_id).await {
            Ok(t) => ticket_holder.replace(t).await,
            Err(e) => {
                log::warn!("supervisor: failed to refresh ticket {}: {}", args.ticket_id, e);
            }
        }

        let is_active = ticket_holder.get().await.status == crate::ticket::TicketStatus::Active;
        if is_active {
            let active_ct = process_ct.child();
            hub_client.bind_active_work_cancellation(active_ct.clone()).await;

            let result = orchestrator::start_agents(occ.clone(), ticket_holder.clone(), &active_ct).await;

            hub_client.unbind_active_work_cancellation().await;

            match result {
                Ok(()) | Err(crate::error::OrchestratorError::Cancelled) => {}
                Err(e) => {
                    log::error!("supervisor: orchestrator run failed: {}", e);
                }
            }
        }

        if process_ct.is_cancelled() {
            break;
        }
        hub_client.wait_for_ticket_change(&process_ct).await;
    }

    0
}

/// Poll until the ticket exists or the process is cancelled (§4.1 step 3: patient retry, no
/// ticket-not-found is ever treated as fatal).
async fn wait_for_ticket(
    api_client: &ApiClient,
    ticket_id: &str,
    ct: &CancellationToken,
) -> Option<crate::ticket::Ticket> {
    loop {
        match api_client.get_ticket(ticket_id).await {
            Ok(ticket) => return Some(ticket),
            Err(e) => {
                log::warn!("supervisor: ticket {} not yet available: {}", ticket_id, e);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(TICKET_POLL_INTERVAL) => {}
            _ = ct.cancelled() => return None,
        }
    }
}
