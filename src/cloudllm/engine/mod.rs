//! LLM conversation engine: the per-turn loop described in §4.3.
//!
//! [`continue_conversation`] is the engine's entire public contract. Everything else in this
//! module (compaction, the XML fallback parser, `Conversation`/`Memories`) supports that one
//! call.

pub mod compaction;
pub mod session;
pub mod xml_fallback;

use crate::api_client::ApiClient;
use crate::cancellation::CancellationToken;
use crate::client_wrapper::{ClientWrapper, Message, Role};
use crate::clients::openai_compat::OpenAiCompatClient;
use crate::hub_client::{ConversationSnapshot, HubClient};
use crate::settings::{CompactionConfig, LLMConfig};
use crate::ticket::TicketHolder;
use crate::tool_protocol::{ToolContext, ToolRegistry};
use session::{Conversation, Memories};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Completed,
    ToolRequestedExit,
    MaxIterationsReached,
    CostExceeded,
    Error,
}

#[derive(Debug, Clone)]
pub struct LlmResult {
    pub exit_reason: ExitReason,
    pub content: String,
    pub final_tool_name: Option<String>,
    pub error_message: Option<String>,
}

impl LlmResult {
    fn completed(content: String) -> Self {
        Self {
            exit_reason: ExitReason::Completed,
            content,
            final_tool_name: None,
            error_message: None,
        }
    }

    fn tool_exit(final_tool_name: String) -> Self {
        Self {
            exit_reason: ExitReason::ToolRequestedExit,
            content: String::new(),
            final_tool_name: Some(final_tool_name),
            error_message: None,
        }
    }

    fn max_iterations() -> Self {
        Self {
            exit_reason: ExitReason::MaxIterationsReached,
            content: String::new(),
            final_tool_name: None,
            error_message: None,
        }
    }

    fn cost_exceeded() -> Self {
        Self {
            exit_reason: ExitReason::CostExceeded,
            content: String::new(),
            final_tool_name: None,
            error_message: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            exit_reason: ExitReason::Error,
            content: String::new(),
            final_tool_name: None,
            error_message: Some(message),
        }
    }
}

/// Everything the engine needs besides the conversation itself and the tool set.
pub struct EngineDeps<'a> {
    pub llm_configs: &'a [LLMConfig],
    pub max_tool_iterations: u32,
    pub compaction: &'a CompactionConfig,
    pub compaction_prompt: &'a str,
    pub ticket: &'a TicketHolder,
    pub api_client: &'a ApiClient,
    pub hub_client: &'a HubClient,
}

/// Run turns against `conversation` until a terminal condition (§4.3 steps 1-13).
pub async fn continue_conversation(
    conversation: &mut Conversation,
    memories: &Arc<Mutex<Memories>>,
    tools: &ToolRegistry,
    tool_ctx: &ToolContext,
    deps: &EngineDeps<'_>,
    ct: &CancellationToken,
) -> LlmResult {
    let mut iterations: u32 = 0;
    let tool_defs = tools.tool_definitions();
    let tool_defs_opt = if tool_defs.is_empty() { None } else { Some(tool_defs) };

    loop {
        if ct.is_cancelled() {
            conversation.finalize();
            return LlmResult::error("cancelled".to_string());
        }

        // Step 2: rate-limit / budget preflight.
        let ticket = deps.ticket.get().await;
        if ticket.would_exceed_budget(ticket.spend) {
            return LlmResult::cost_exceeded();
        }

        let request_messages = {
            let mem = memories.lock().await;
            conversation.request_messages(&mem)
        };

        // Steps 3-4: call each configured provider in turn, falling back on failure.
        let mut last_error: Option<String> = None;
        let mut assistant: Option<Message> = None;
        let mut used_config: Option<&LLMConfig> = None;

        for config in deps.llm_configs {
            let client = OpenAiCompatClient::new(&config.api_key, &config.model, config.endpoint.as_deref());
            match client.send_message(&request_messages, tool_defs_opt.clone()).await {
                Ok(msg) => {
                    // Step 5: spend accounting.
                    if let Some(usage) = client.get_last_usage().await {
                        let cost = usage.input_tokens as f64 * config.input_token_price
                            + usage.output_tokens as f64 * config.output_token_price;
                        if cost > 0.0 {
                            let mut t = deps.ticket.get().await;
                            t.spend += cost;
                            let _ = deps.api_client.set_cost(&t.id, t.spend).await;
                            deps.ticket.replace(t).await;
                        }
                    }
                    assistant = Some(msg);
                    used_config = Some(config);
                    break;
                }
                Err(e) => {
                    log::warn!("engine: provider '{}' failed, trying next: {}", config.model, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let Some(assistant) = assistant else {
            return LlmResult::error(
                last_error.unwrap_or_else(|| "all configured LLM providers were exhausted".to_string()),
            );
        };
        let context_length = used_config.map(|c| c.context_length).unwrap_or(128_000);

        // Step 6: native tool calls, or XML fallback when absent.
        let tool_calls = if !assistant.tool_calls.is_empty() {
            assistant.tool_calls.clone()
        } else {
            xml_fallback::parse_fallback_tool_calls(&assistant.content, tools)
        };

        // Step 7: no tool calls -> completed.
        if tool_calls.is_empty() {
            conversation.push(assistant.clone());
            return LlmResult::completed(assistant.content.to_string());
        }

        conversation.push(assistant.clone());

        // Step 8: execute each call in order.
        let mut final_tool: Option<String> = None;
        for call in &tool_calls {
            let result = if !tools.contains(&call.name) {
                crate::tool_protocol::ToolResult::failure(format!("Unknown tool '{}'", call.name))
            } else {
                tools.execute(&call.name, call.arguments.clone(), tool_ctx).await
            };

            if result.is_final {
                final_tool = result.final_tool_name.clone().or_else(|| Some(call.name.clone()));
            }

            conversation.push(Message {
                role: Role::Tool { call_id: call.id.clone() },
                content: Arc::from(result.to_tool_message_text().as_str()),
                tool_calls: vec![],
            });
        }

        // Step 9.
        if let Some(tool_name) = final_tool {
            return LlmResult::tool_exit(tool_name);
        }

        // Step 10.
        iterations += 1;
        if iterations >= deps.max_tool_iterations {
            return LlmResult::max_iterations();
        }

        // Step 11: compaction check.
        let should_compact = {
            let mem = memories.lock().await;
            compaction::should_compact(
                conversation,
                &mem,
                context_length,
                deps.compaction,
                compaction::CompactionTrigger::Threshold,
            )
        };
        if should_compact {
            run_compaction(conversation, memories, deps).await;
        }

        // Step 12: best-effort snapshot publish.
        publish_snapshot(conversation, deps).await;

        // Step 13: loop.
    }
}

/// Force a compaction regardless of threshold (§4.3.1 `CompactNow`), used at the end of a
/// successful developer subtask before the conversation is discarded.
pub async fn compact_now(conversation: &mut Conversation, memories: &Arc<Mutex<Memories>>, deps: &EngineDeps<'_>) {
    run_compaction(conversation, memories, deps).await;
}

async fn run_compaction(conversation: &mut Conversation, memories: &Arc<Mutex<Memories>>, deps: &EngineDeps<'_>) {
    let Some(config) = deps.llm_configs.first() else {
        return;
    };
    let client = OpenAiCompatClient::new(&config.api_key, &config.model, config.endpoint.as_deref());

    let request = {
        let mem = memories.lock().await;
        let mut msgs = vec![Message {
            role: Role::System,
            content: Arc::from(deps.compaction_prompt),
            tool_calls: vec![],
        }];
        msgs.extend(conversation.history().iter().cloned());
        let _ = &mem; // history already reflects current Memories via request_messages elsewhere
        msgs
    };

    match client.send_message(&request, None).await {
        Ok(response) => {
            let mut mem = memories.lock().await;
            if let Err(warning) = compaction::apply_compaction(conversation, &mut mem, &response.content) {
                log::warn!("engine: compaction failed: {}", warning);
                let ticket = deps.ticket.get().await;
                let _ = deps.api_client.post_activity(&ticket.id, &format!("compaction warning: {}", warning)).await;
            }
        }
        Err(e) => {
            log::warn!("engine: compaction call failed: {}", e);
        }
    }
}

async fn publish_snapshot(conversation: &Conversation, deps: &EngineDeps<'_>) {
    let ticket = deps.ticket.get().await;
    let messages = conversation
        .history()
        .iter()
        .map(|m| {
            let role = match &m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool { .. } => "tool",
            };
            (role.to_string(), m.content.to_string())
        })
        .collect();
    deps.hub_client
        .sync_conversation(ConversationSnapshot {
            conversation_id: conversation.id.clone(),
            ticket_id: ticket.id,
            messages,
        })
        .await;
}
