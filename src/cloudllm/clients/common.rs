//! Shared HTTP plumbing for OpenAI-compatible chat completion endpoints.
//!
//! A single pooled [`reqwest::Client`] is reused across every call so that TLS sessions and DNS
//! lookups stay warm between turns.

use crate::client_wrapper::{Message, MessageChunk, NativeToolCall, Role, TokenUsage, ToolDefinition};
use lazy_static::lazy_static;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Raw response from [`send_chat_request`], prior to any rate-limit/retry interpretation.
pub struct RawChatResponse {
    pub status: reqwest::StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: String,
}

/// POST one chat-completion request to an OpenAI-compatible `/chat/completions` endpoint.
///
/// This is the single wire-level call shared by every retry/fallback attempt in
/// [`crate::clients::openai_compat::OpenAiCompatClient`]; it performs no retry logic itself and
/// never inspects the status code beyond returning it to the caller.
///
/// `tool_choice` is `None` to omit the field entirely (the third rung of the tool-choice
/// downgrade ladder), or `Some("required"|"auto")`.
pub async fn send_chat_request(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    tool_choice: Option<&str>,
    http_client: &reqwest::Client,
) -> Result<RawChatResponse, Box<dyn Error>> {
    let wire_messages: Vec<serde_json::Value> = messages.iter().map(message_to_wire).collect();
    let wire_tools: Vec<serde_json::Value> = tools.iter().map(tool_to_wire).collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
    });
    if !wire_tools.is_empty() {
        body["tools"] = serde_json::Value::Array(wire_tools);
        if let Some(choice) = tool_choice {
            body["tool_choice"] = serde_json::Value::String(choice.to_string());
        }
    }

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let text = resp
        .text()
        .await
        .map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    Ok(RawChatResponse {
        status,
        headers,
        body: text,
    })
}

fn message_to_wire(msg: &Message) -> serde_json::Value {
    match &msg.role {
        Role::System => serde_json::json!({
            "role": "system",
            "content": msg.content.as_ref()
        }),
        Role::User => serde_json::json!({
            "role": "user",
            "content": msg.content.as_ref()
        }),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                serde_json::json!({
                    "role": "assistant",
                    "content": msg.content.as_ref()
                })
            } else {
                let tool_calls: Vec<serde_json::Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string())
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": serde_json::Value::Null,
                    "tool_calls": tool_calls
                })
            }
        }
        Role::Tool { call_id } => serde_json::json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": msg.content.as_ref()
        }),
    }
}

fn tool_to_wire(t: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": t.name,
            "description": t.description,
            "parameters": t.parameters_schema
        }
    })
}

/// Parse a successful `choices[0].message` body into a [`Message`], recording usage.
pub async fn parse_chat_response(
    body: &str,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error>> {
    let parsed: serde_json::Value =
        serde_json::from_str(body).map_err(|e| -> Box<dyn Error> { Box::new(e) })?;

    if let Some(usage_obj) = parsed.get("usage") {
        let input = usage_obj
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output = usage_obj
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        *usage_slot.lock().await = Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        });
    }

    let choice_msg = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| -> Box<dyn Error> { "no choices in response".into() })?;

    let content: Arc<str> = choice_msg
        .get("content")
        .and_then(|c| c.as_str())
        .map(Arc::from)
        .unwrap_or_else(|| Arc::from(""));

    let tool_calls: Vec<NativeToolCall> = choice_msg
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: serde_json::Value = serde_json::from_str(args_str)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    Some(NativeToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        role: Role::Assistant,
        content,
        tool_calls,
    })
}

/// Thin error wrapper used when streaming responses fail mid-flight.
#[derive(Debug, Clone)]
pub struct StreamError(pub String);

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StreamError {}

/// Convert eagerly collected message chunks into a boxed stream suitable for [`ClientWrapper`](crate::client_wrapper::ClientWrapper)
/// implementations.
pub fn chunks_to_stream(
    chunks: Vec<Result<MessageChunk, Box<dyn Error + Send>>>,
) -> crate::client_wrapper::MessageChunkStream {
    let stream = futures_util::stream::iter(
        chunks
            .into_iter()
            .map(|r| r.map_err(|e| e as Box<dyn Error>)),
    );
    Box::pin(stream)
}
