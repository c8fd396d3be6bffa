//! Shared scaffolding for the end-to-end scenario tests (§8): a hand-rolled HTTP/1.1 stub
//! server standing in for the control-plane REST API and the LLM provider endpoint, plus small
//! JSON helpers the per-scenario handlers use to script responses.
//!
//! No example repo in this corpus pulls in an HTTP-mocking crate, so this speaks just enough
//! HTTP/1.1 by hand: a request line, headers up to `Content-Length`, an exact body read, and a
//! `Connection: close` response. Good enough for a handful of localhost round-trips per test.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use ticket_worker::cloudllm::api_client::ApiClient;
use ticket_worker::cloudllm::hub_client::HubClient;
use ticket_worker::cloudllm::orchestrator::OrchestratorCtx;
use ticket_worker::cloudllm::settings::{
    CompactionConfig, LLMConfig, OrchestratorConfig, Prompts, Settings,
};
use ticket_worker::cloudllm::ticket::{Subtask, SubtaskStatus, Task, Ticket, TicketStatus};

pub type HandlerFn = dyn Fn(&str, &str, &str) -> (u16, Vec<(String, String)>, String) + Send + Sync;

/// A stub server bound to an ephemeral localhost port, serving whatever `handler` decides for
/// every request until dropped.
pub struct TestServer {
    url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(handler: Arc<HandlerFn>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
        let addr = listener.local_addr().expect("stub server local addr");
        let handle = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = serve_one(socket, handler).await;
                });
            }
        });
        Self { url: format!("http://{}", addr), handle }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(socket: tokio::net::TcpStream, handler: Arc<HandlerFn>) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if let Some(rest) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = rest.trim().parse().unwrap_or(0);
        }
    }

    let mut body_bytes = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body_bytes).await?;
    }
    let body = String::from_utf8_lossy(&body_bytes).to_string();

    let (status, extra_headers, resp_body) = handler(&method, &path, &body);
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        reason_phrase(status),
        resp_body.as_bytes().len()
    );
    for (k, v) in extra_headers {
        head.push_str(&format!("{}: {}\r\n", k, v));
    }
    head.push_str("\r\n");
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(resp_body.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// In-memory ticket state backing the stub's `/api/tickets/...` routes, shared between the test
/// and the server task via `Arc`.
pub struct TicketStore(StdMutex<Ticket>);

impl TicketStore {
    pub fn new(ticket: Ticket) -> Arc<Self> {
        Arc::new(Self(StdMutex::new(ticket)))
    }

    pub fn get(&self) -> Ticket {
        self.0.lock().unwrap().clone()
    }

    pub fn set(&self, t: Ticket) {
        *self.0.lock().unwrap() = t;
    }

    pub fn activity_log(&self) -> Vec<String> {
        self.0.lock().unwrap().activity_log.clone()
    }
}

fn ok_json(t: Ticket) -> (u16, Vec<(String, String)>, String) {
    (200, vec![], serde_json::to_string(&t).unwrap())
}

/// Route one request against `ApiClient`'s exact REST surface. Returns `None` for anything
/// outside `/api/tickets/...` so the caller can fall through to its own routes.
pub fn route_ticket_api(
    store: &TicketStore,
    method: &str,
    path: &str,
    body: &str,
) -> Option<(u16, Vec<(String, String)>, String)> {
    let segs: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if segs.first() != Some(&"api") || segs.get(1) != Some(&"tickets") {
        return None;
    }
    segs.get(2)?;
    let tail = &segs[3..];

    match (method, tail) {
        ("GET", []) => Some(ok_json(store.get())),
        ("PATCH", ["status"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let mut t = store.get();
            t.status = match v.get("status").and_then(|s| s.as_str()) {
                Some("active") => TicketStatus::Active,
                Some("failed") => TicketStatus::Failed,
                Some("done") => TicketStatus::Done,
                _ => TicketStatus::Backlog,
            };
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("PATCH", ["branch"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let mut t = store.get();
            t.branch_name = v.get("branchName").and_then(|s| s.as_str()).map(|s| s.to_string());
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("PATCH", ["cost"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let mut t = store.get();
            t.spend = v.get("cost").and_then(|c| c.as_f64()).unwrap_or(t.spend);
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("POST", ["tasks"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let task: Task = serde_json::from_value(v.get("task").cloned().unwrap_or(Value::Null))
                .expect("well-formed task in add_task request");
            let mut t = store.get();
            t.tasks.push(task);
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("POST", ["tasks", task_id, "subtasks"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let subtask: Subtask =
                serde_json::from_value(v.get("subtask").cloned().unwrap_or(Value::Null))
                    .expect("well-formed subtask in add_subtask request");
            let mut t = store.get();
            if let Some(task) = t.tasks.iter_mut().find(|task| task.id == *task_id) {
                task.subtasks.push(subtask);
            }
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("PATCH", ["tasks", task_id, "subtasks", subtask_id]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let status = match v.get("status").and_then(|s| s.as_str()) {
                Some("incomplete") => SubtaskStatus::Incomplete,
                Some("in-progress") => SubtaskStatus::InProgress,
                Some("awaiting-review") => SubtaskStatus::AwaitingReview,
                Some("complete") => SubtaskStatus::Complete,
                Some("rejected") => SubtaskStatus::Rejected,
                _ => SubtaskStatus::Incomplete,
            };
            let mut t = store.get();
            if let Some(task) = t.tasks.iter_mut().find(|task| task.id == *task_id) {
                if let Some(sub) = task.subtasks.iter_mut().find(|s| s.id == *subtask_id) {
                    sub.status = status;
                }
            }
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("DELETE", ["tasks"]) => {
            let mut t = store.get();
            t.tasks.clear();
            store.set(t.clone());
            Some(ok_json(t))
        }
        ("POST", ["activity"]) => {
            let v: Value = serde_json::from_str(body).unwrap_or_default();
            let message = v.get("message").and_then(|m| m.as_str()).unwrap_or("").to_string();
            let mut t = store.get();
            t.activity_log.push(message);
            store.set(t);
            Some((200, vec![], "{}".to_string()))
        }
        _ => None,
    }
}

// --- LLM request/response helpers -----------------------------------------------------------

pub fn parse_request(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or(Value::Null)
}

pub fn messages(body_json: &Value) -> Vec<Value> {
    body_json.get("messages").and_then(|m| m.as_array()).cloned().unwrap_or_default()
}

pub fn has_tools(body_json: &Value) -> bool {
    body_json
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

pub fn model_name(body_json: &Value) -> String {
    body_json.get("model").and_then(|m| m.as_str()).unwrap_or("").to_string()
}

fn tool_names(body_json: &Value) -> Vec<String> {
    body_json
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.get("function")?.get("name")?.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Which phase issued this request, inferred from its terminal tool (every phase registry
/// carries exactly one kind of terminal tool — see `orchestrator::terminal_tools`).
pub fn phase_of(body_json: &Value) -> &'static str {
    if !has_tools(body_json) {
        return "compaction";
    }
    let names = tool_names(body_json);
    if names.iter().any(|n| n == "planning_complete") {
        "planning"
    } else if names.iter().any(|n| n == "end_subtask") {
        "developer"
    } else if names.iter().any(|n| n == "approve_subtask" || n == "reject_subtask") {
        "qa"
    } else {
        "unknown"
    }
}

pub fn count_tool_messages(msgs: &[Value]) -> usize {
    msgs.iter()
        .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("tool"))
        .count()
}

/// Number of tool-role messages since the last user message mentioning a QA rejection — lets a
/// developer-phase handler distinguish "before rejection" from "retrying after rejection" within
/// the one long-lived conversation (§4.2 Developer phase never starts a fresh conversation on
/// rejection).
pub fn tool_count_since_rejection(msgs: &[Value]) -> usize {
    let mut start = 0;
    for (i, m) in msgs.iter().enumerate() {
        let is_rejection_notice = m.get("role").and_then(|r| r.as_str()) == Some("user")
            && m.get("content")
                .and_then(|c| c.as_str())
                .map(|c| c.contains("QA rejected"))
                .unwrap_or(false);
        if is_rejection_notice {
            start = i + 1;
        }
    }
    count_tool_messages(&msgs[start..])
}

pub fn rejected_before(msgs: &[Value]) -> bool {
    msgs.iter().any(|m| {
        m.get("role").and_then(|r| r.as_str()) == Some("user")
            && m.get("content")
                .and_then(|c| c.as_str())
                .map(|c| c.contains("QA rejected"))
                .unwrap_or(false)
    })
}

pub fn last_tool_message_json(msgs: &[Value]) -> Option<Value> {
    msgs.iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("tool"))
        .and_then(|m| m.get("content").and_then(|c| c.as_str()))
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
}

pub fn system_message_content(msgs: &[Value]) -> String {
    msgs.iter()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("system"))
        .and_then(|m| m.get("content").and_then(|c| c.as_str()))
        .unwrap_or("")
        .to_string()
}

/// Build a `choices[0].message` response carrying one or more native tool calls.
pub fn assistant_tool_calls(calls: &[(&str, Value)], prompt_tokens: u64, completion_tokens: u64) -> String {
    let tool_calls: Vec<Value> = calls
        .iter()
        .enumerate()
        .map(|(i, (name, args))| {
            json!({
                "id": format!("call_{i}"),
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": serde_json::to_string(args).unwrap(),
                }
            })
        })
        .collect();
    json!({
        "choices": [{"message": {"role": "assistant", "content": Value::Null, "tool_calls": tool_calls}}],
        "usage": {"prompt_tokens": prompt_tokens, "completion_tokens": completion_tokens}
    })
    .to_string()
}

/// Build a plain-content (no tool calls) assistant response.
pub fn assistant_content(content: &str, prompt_tokens: u64, completion_tokens: u64) -> String {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": prompt_tokens, "completion_tokens": completion_tokens}
    })
    .to_string()
}

pub fn rate_limited_response() -> (u16, Vec<(String, String)>, String) {
    (
        429,
        vec![("Retry-After".to_string(), "0".to_string())],
        json!({"error": {"code": "rate_limit_exceeded", "message": "slow down"}}).to_string(),
    )
}

pub fn not_found() -> (u16, Vec<(String, String)>, String) {
    (404, vec![], "{}".to_string())
}

/// Monotonic call counter for handlers that need to distinguish "the Nth time this phase was
/// entered" across otherwise-identical requests (e.g. successive `qa::run` invocations, which
/// each start a brand-new conversation).
pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn next(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

// --- Fixture construction --------------------------------------------------------------------

pub fn base_ticket(id: &str, title: &str, description: &str) -> Ticket {
    Ticket {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        status: TicketStatus::Active,
        branch_name: None,
        tasks: vec![],
        activity_log: vec![],
        spend: 0.0,
        max_cost: None,
    }
}

/// A ticket that already has a valid plan, for scenarios that don't exercise Planning itself.
pub fn ticket_with_plan(id: &str, title: &str, task_id: &str, subtask_id: &str, subtask_name: &str) -> Ticket {
    let mut t = base_ticket(id, title, "pre-planned ticket");
    t.tasks.push(Task {
        id: task_id.to_string(),
        name: "Docs".to_string(),
        description: "Write documentation".to_string(),
        subtasks: vec![Subtask::new(subtask_id, subtask_name, "Create README.md")],
    });
    t
}

pub fn llm_config(model: &str, endpoint: &str) -> LLMConfig {
    LLMConfig {
        api_key: "test-key".to_string(),
        model: model.to_string(),
        endpoint: Some(endpoint.to_string()),
        context_length: 128_000,
        input_token_price: 0.0,
        output_token_price: 0.0,
        temperature: None,
    }
}

pub fn settings(llm_configs: Vec<LLMConfig>) -> Settings {
    Settings {
        llm_configs,
        git_config: Default::default(),
        compaction: CompactionConfig::default(),
        web_search: Default::default(),
        json_logging: false,
        orchestrator: OrchestratorConfig::default(),
    }
}

/// Write the five required `<role>.txt` prompt templates into `dir`.
pub fn write_prompts(dir: &std::path::Path) {
    for role in ["planning", "developer", "subagent", "compaction", "qualityassurance"] {
        std::fs::write(dir.join(format!("{role}.txt")), format!("You are the {role} agent.")).unwrap();
    }
}

pub fn load_prompts(dir: &std::path::Path) -> Prompts {
    write_prompts(dir);
    Prompts::load_from_dir(dir).expect("prompt templates")
}

/// Build an `OrchestratorCtx` talking to `server_url` for both the ticket API and (via each
/// `LLMConfig.endpoint`) the LLM provider, rooted at `workspace_dir`.
pub async fn build_ctx(
    settings: Settings,
    prompts_dir: &std::path::Path,
    server_url: &str,
    workspace_dir: std::path::PathBuf,
    ticket_id: &str,
) -> OrchestratorCtx {
    let prompts = load_prompts(prompts_dir);
    let api_client = Arc::new(ApiClient::new(server_url));
    let hub_client = HubClient::new(server_url);
    hub_client.connect(ticket_id).await.expect("hub connect");
    OrchestratorCtx::new(
        settings,
        prompts,
        api_client,
        hub_client,
        workspace_dir,
        "repo".to_string(),
        ticket_id.to_string(),
        "2026-07-27".to_string(),
    )
}
