//! §8 scenario 1: a ticket with no existing plan goes through Planning, one Developer/QA cycle,
//! and lands `done` with an activity log recording every phase boundary.

mod support;

use std::sync::Arc;
use ticket_worker::cloudllm::cancellation::CancellationToken;
use ticket_worker::cloudllm::orchestrator::start_agents;
use ticket_worker::cloudllm::ticket::{SubtaskStatus, TicketHolder, TicketStatus};
use support::*;

#[tokio::test]
async fn full_run_completes_and_marks_ticket_done() {
    let store = TicketStore::new(base_ticket("t-1", "Add a README", "Write a one-paragraph README"));

    let handler: Arc<HandlerFn> = Arc::new(move |method, path, body| {
        if let Some(resp) = route_ticket_api(&store, method, path, body) {
            return resp;
        }
        let req = parse_request(body);
        let msgs = messages(&req);
        match phase_of(&req) {
            "planning" => {
                if count_tool_messages(&msgs) == 0 {
                    assistant_tool_calls_resp(&[(
                        "add_task",
                        serde_json::json!({"name": "Docs", "description": "Write documentation"}),
                    )])
                } else if count_tool_messages(&msgs) == 1 {
                    assistant_tool_calls_resp(&[(
                        "add_subtask",
                        serde_json::json!({
                            "taskId": last_tool_message_json(&msgs)
                                .and_then(|v| v.get("taskId").cloned())
                                .unwrap(),
                            "name": "Write README",
                            "description": "Create README.md"
                        }),
                    )])
                } else {
                    assistant_tool_calls_resp(&[("planning_complete", serde_json::json!({}))])
                }
            }
            "developer" => {
                if count_tool_messages(&msgs) == 0 {
                    (
                        200,
                        vec![],
                        assistant_tool_calls(
                            &[("file_write", serde_json::json!({"path": "README.md", "content": "Hello"}))],
                            10,
                            10,
                        ),
                    )
                } else {
                    (200, vec![], assistant_tool_calls(&[("end_subtask", serde_json::json!({"summary": "Added README.md"}))], 10, 10))
                }
            }
            "qa" => {
                if count_tool_messages(&msgs) == 0 {
                    (
                        200,
                        vec![],
                        assistant_tool_calls(&[("file_read", serde_json::json!({"path": "README.md"}))], 10, 10),
                    )
                } else {
                    (200, vec![], assistant_tool_calls(&[("approve_subtask", serde_json::json!({"notes": "looks good"}))], 10, 10))
                }
            }
            "compaction" => (200, vec![], assistant_content("<summary>done</summary>", 5, 5)),
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
        "t-1",
    )
    .await;

    let ticket = TicketHolder::new(occ.api_client.get_ticket("t-1").await.unwrap());
    let ct = CancellationToken::new();

    start_agents(occ, ticket.clone(), &ct).await.expect("orchestrator run succeeds");

    let t = ticket.get().await;
    assert_eq!(t.status, TicketStatus::Done);
    assert_eq!(t.tasks.len(), 1);
    assert_eq!(t.tasks[0].subtasks.len(), 1);
    assert_eq!(t.tasks[0].subtasks[0].status, SubtaskStatus::Complete);
    assert!(t.activity_log.iter().any(|m| m == "Planning started"));
    assert!(t.activity_log.iter().any(|m| m == "Planning complete."));
    assert!(t.activity_log.iter().any(|m| m.starts_with("Starting subtask")));
    assert!(t.activity_log.iter().any(|m| m.starts_with("Subtask completed: Write README")));
    assert!(t.activity_log.iter().any(|m| m == "All subtasks complete"));

    let readme = std::fs::read_to_string(workspace.path().join("README.md")).expect("README.md was written");
    assert_eq!(readme, "Hello");
}

fn assistant_tool_calls_resp(calls: &[(&str, serde_json::Value)]) -> (u16, Vec<(String, String)>, String) {
    (200, vec![], assistant_tool_calls(calls, 10, 10))
}
