//! §8 scenario 2: QA rejects the developer's first attempt; the developer addresses the
//! feedback in the SAME conversation and resubmits; QA approves the second attempt.

mod support;

use std::sync::Arc;
use ticket_worker::cloudllm::cancellation::CancellationToken;
use ticket_worker::cloudllm::orchestrator::start_agents;
use ticket_worker::cloudllm::ticket::{SubtaskStatus, TicketHolder};
use support::*;

#[tokio::test]
async fn qa_rejection_is_retried_and_then_approved() {
    let qa_calls = counter();
    let store = TicketStore::new(ticket_with_plan("t-2", "Fix login bug", "task-1", "sub-1", "Fix login bug"));

    let handler: Arc<HandlerFn> = Arc::new(move |method, path, body| {
        if let Some(resp) = route_ticket_api(&store, method, path, body) {
            return resp;
        }
        let req = parse_request(body);
        let msgs = messages(&req);
        match phase_of(&req) {
            "planning" => (200, vec![], assistant_tool_calls(&[("planning_complete", serde_json::json!({}))], 5, 5)),
            "developer" => (
                200,
                vec![],
                assistant_tool_calls(
                    &[("end_subtask", serde_json::json!({"summary": "Fixed the login bug"}))],
                    10,
                    10,
                ),
            ),
            "qa" => {
                let n = next(&qa_calls);
                if n == 1 {
                    (
                        200,
                        vec![],
                        assistant_tool_calls(
                            &[("reject_subtask", serde_json::json!({"feedback": "Missing a null check"}))],
                            10,
                            10,
                        ),
                    )
                } else {
                    (
                        200,
                        vec![],
                        assistant_tool_calls(
                            &[("approve_subtask", serde_json::json!({"notes": "null check added"}))],
                            10,
                            10,
                        ),
                    )
                }
            }
            "compaction" => (200, vec![], assistant_content("<summary>fixed</summary>", 5, 5)),
            _ => {
                let _ = msgs;
                not_found()
            }
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
        "t-2",
    )
    .await;

    let ticket = TicketHolder::new(occ.api_client.get_ticket("t-2").await.unwrap());
    let ct = CancellationToken::new();

    start_agents(occ, ticket.clone(), &ct).await.expect("orchestrator run succeeds");

    assert_eq!(qa_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let t = ticket.get().await;
    assert_eq!(t.tasks[0].subtasks[0].status, SubtaskStatus::Complete);
    assert!(t
        .activity_log
        .iter()
        .any(|m| m.contains("QA rejected subtask sub-1") && m.contains("Missing a null check")));
}
