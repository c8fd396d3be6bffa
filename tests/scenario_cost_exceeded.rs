//! §8 scenario 4: a non-final tool call's token usage pushes spend past `max_cost`; the next
//! preflight check inside the same conversation then refuses to continue and the ticket is
//! marked `failed` with a budget-specific activity message.

mod support;

use std::sync::Arc;
use ticket_worker::cloudllm::cancellation::CancellationToken;
use ticket_worker::cloudllm::error::OrchestratorError;
use ticket_worker::cloudllm::orchestrator::start_agents;
use ticket_worker::cloudllm::ticket::{Ticket, TicketHolder, TicketStatus};
use support::*;

#[tokio::test]
async fn budget_exceeded_fails_the_ticket() {
    let mut ticket = base_ticket("t-4", "Expensive task", "A task whose first LLM call blows the budget");
    ticket.max_cost = Some(0.01);
    let store = TicketStore::new(ticket);

    let handler: Arc<HandlerFn> = Arc::new(move |method, path, body| {
        if let Some(resp) = route_ticket_api(&store, method, path, body) {
            return resp;
        }
        let req = parse_request(body);
        assert_eq!(phase_of(&req), "planning");
        (
            200,
            vec![],
            assistant_tool_calls(
                &[("add_task", serde_json::json!({"name": "Docs", "description": "Write documentation"}))],
                1,
                1,
            ),
        )
    });

    let server = TestServer::start(handler).await;
    let workspace = tempfile::tempdir().unwrap();
    let prompts_dir = tempfile::tempdir().unwrap();

    let mut cfg = llm_config("test-model", &server.url());
    cfg.input_token_price = 0.01;
    cfg.output_token_price = 0.01;
    let occ = build_ctx(
        settings(vec![cfg]),
        prompts_dir.path(),
        &server.url(),
        workspace.path().to_path_buf(),
        "t-4",
    )
    .await;

    let ticket_data: Ticket = occ.api_client.get_ticket("t-4").await.unwrap();
    let ticket = TicketHolder::new(ticket_data);
    let ct = CancellationToken::new();

    let result = start_agents(occ, ticket.clone(), &ct).await;

    assert!(matches!(result, Err(OrchestratorError::BudgetExceeded)));

    let t = ticket.get().await;
    assert_eq!(t.status, TicketStatus::Failed);
    assert!((t.spend - 0.02).abs() < 1e-9, "expected spend to land at 0.02, got {}", t.spend);
    assert!(t.activity_log.iter().any(|m| m == "Failed: Cost budget exceeded"));
}
