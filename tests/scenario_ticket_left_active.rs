//! §8 scenario 5: the Hub observes the ticket leave the active state mid-developer-phase.
//! Cancellation unwinds the run with `OrchestratorError::Cancelled` and leaves the ticket exactly
//! as it was — never `failed`, never `done`. The phase loop's own cancellation check (not the
//! engine's internal one, which surfaces cancellation as a generic provider error) is what must
//! catch this.
//!
//! The real wire transport that would carry a `TicketUpdated` push event is out of scope (§1,
//! §6), and `HubClient::on_ticket_updated`'s own cancel-the-bound-token behavior already has
//! direct unit coverage in `hub_client.rs`. This test exercises the orchestrator's reaction to
//! that cancellation by cancelling the same token `on_ticket_updated` would reach through,
//! synchronously from inside the stub LLM handler so the ordering is deterministic without a
//! real push channel.

mod support;

use std::sync::Arc;
use ticket_worker::cloudllm::cancellation::CancellationToken;
use ticket_worker::cloudllm::error::OrchestratorError;
use ticket_worker::cloudllm::orchestrator::start_agents;
use ticket_worker::cloudllm::ticket::{TicketHolder, TicketStatus};
use support::*;

#[tokio::test]
async fn ticket_leaving_active_mid_developer_phase_cancels_the_run() {
    let store = TicketStore::new(ticket_with_plan("t-5", "Long task", "task-1", "sub-1", "Do the long task"));
    let calls = counter();

    let ct = CancellationToken::new();
    let ct_for_handler = ct.clone();

    let handler: Arc<HandlerFn> = Arc::new(move |method, path, body| {
        if let Some(resp) = route_ticket_api(&store, method, path, body) {
            return resp;
        }
        let req = parse_request(body);
        match phase_of(&req) {
            "planning" => (200, vec![], assistant_tool_calls(&[("planning_complete", serde_json::json!({}))], 5, 5)),
            "developer" => {
                let n = next(&calls);
                assert_eq!(n, 1, "the run must be cancelled before a second developer LLM call is made");
                // Stand-in for the Hub's TicketUpdated(status=backlog) push reaching the bound
                // active-work token (§4.5) — see module doc comment for why this is synchronous.
                ct_for_handler.cancel();
                // No tool calls: Developer's continue_conversation call returns ExitReason::
                // Completed, so control returns to run_subtask's own loop — the only place that
                // turns a pending cancellation into Cancelled.
                (200, vec![], assistant_content("Still working on it...", 5, 5))
            }
            _ => not_found(),
        }
    });

    let server = TestServer::start(handler).await;
    let workspace = tempfile::tempdir().unwrap();
    let prompts_dir = tempfile::tempdir().unwrap();

    let cfg = llm_config("test-model", &server.url());
    let occ = build_ctx(
        settings(vec![cfg]),
        prompts_dir.path(),
        &server.url(),
        workspace.path().to_path_buf(),
        "t-5",
    )
    .await;
    occ.hub_client.bind_active_work_cancellation(ct.clone()).await;

    let ticket = TicketHolder::new(occ.api_client.get_ticket("t-5").await.unwrap());

    let result = start_agents(occ, ticket.clone(), &ct).await;

    assert!(matches!(result, Err(OrchestratorError::Cancelled)));

    let t = ticket.get().await;
    assert_eq!(
        t.status,
        TicketStatus::Active,
        "cancellation must not mark the ticket failed or done — the ticket's own status transition \
         belongs to whatever moved it out of active-work in the first place"
    );
    assert!(!t.activity_log.iter().any(|m| m.starts_with("Failed")));
}
