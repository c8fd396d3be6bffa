//! §8 scenario 3: the first configured LLM provider is unreachable (persistent 5xx); the engine
//! exhausts that provider's retry budget and falls back to the second configured provider, and
//! the run still completes successfully end to end.

mod support;

use std::sync::Arc;
use ticket_worker::cloudllm::cancellation::CancellationToken;
use ticket_worker::cloudllm::orchestrator::start_agents;
use ticket_worker::cloudllm::ticket::{SubtaskStatus, TicketHolder, TicketStatus};
use support::*;

#[tokio::test]
async fn falls_back_to_second_provider_after_first_fails() {
    let store = TicketStore::new(ticket_with_plan("t-3", "Add logging", "task-1", "sub-1", "Add logging"));
    let model_a_calls = counter();

    let handler: Arc<HandlerFn> = Arc::new(move |method, path, body| {
        if let Some(resp) = route_ticket_api(&store, method, path, body) {
            return resp;
        }
        let req = parse_request(body);
        if model_name(&req) == "model-a" {
            next(&model_a_calls);
            return (500, vec![], serde_json::json!({"error": {"message": "upstream down"}}).to_string());
        }
        match phase_of(&req) {
            "planning" => (200, vec![], assistant_tool_calls(&[("planning_complete", serde_json::json!({}))], 5, 5)),
            "developer" => (
                200,
                vec![],
                assistant_tool_calls(&[("end_subtask", serde_json::json!({"summary": "Added logging"}))], 10, 10),
            ),
            "qa" => (
                200,
                vec![],
                assistant_tool_calls(&[("approve_subtask", serde_json::json!({"notes": "ok"}))], 10, 10),
            ),
            "compaction" => (200, vec![], assistant_content("<summary>logged</summary>", 5, 5)),
            _ => not_found(),
        }
    });

    let server = TestServer::start(handler).await;
    let workspace = tempfile::tempdir().unwrap();
    let prompts_dir = tempfile::tempdir().unwrap();

    let cfg_a = llm_config("model-a", &server.url());
    let cfg_b = llm_config("model-b", &server.url());
    let occ = build_ctx(
        settings(vec![cfg_a, cfg_b]),
        prompts_dir.path(),
        &server.url(),
        workspace.path().to_path_buf(),
        "t-3",
    )
    .await;

    let ticket = TicketHolder::new(occ.api_client.get_ticket("t-3").await.unwrap());
    let ct = CancellationToken::new();

    start_agents(occ, ticket.clone(), &ct).await.expect("orchestrator run succeeds via fallback");

    let t = ticket.get().await;
    assert_eq!(t.status, TicketStatus::Done);
    assert_eq!(t.tasks[0].subtasks[0].status, SubtaskStatus::Complete);
    assert!(
        model_a_calls.load(std::sync::atomic::Ordering::SeqCst) > 0,
        "the failing provider should have been attempted before falling back"
    );
}
