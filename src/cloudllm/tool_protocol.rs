//! Tool registry and dispatch contract.
//!
//! Tools are discovered at conversation-construction time by explicit registration (the
//! per-phase builders in `orchestrator::*` register exactly the tool set a role is allowed to
//! use). Each [`Tool`] pairs a [`ToolMetadata`] description — used both for the LLM-facing JSON
//! schema and for argument validation — with a handler that executes the side effect.

use crate::api_client::ApiClient;
use crate::cancellation::CancellationToken;
use crate::engine::session::Memories;
use crate::hub_client::HubClient;
use crate::settings::{LLMConfig, WebSearchConfig};
use crate::ticket::TicketHolder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::tools::shell::PersistentShellTable;

/// Maximum length of a tool response payload before it is truncated (§4.4).
pub const MAX_RESPONSE_CHARS: usize = 160_000;

/// Truncate an oversized tool response, leaving an omission marker.
///
/// Returns the input unchanged when `len(input) <= MAX_RESPONSE_CHARS`.
pub fn truncate_response(input: &str) -> String {
    if input.chars().count() <= MAX_RESPONSE_CHARS {
        return input.to_string();
    }
    let truncated: String = input.chars().take(MAX_RESPONSE_CHARS).collect();
    let omitted = input.chars().count() - MAX_RESPONSE_CHARS;
    format!("{}\n...[{} characters omitted]", truncated, omitted)
}

/// Result of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// Signals the Engine to exit the turn loop with `tool_requested_exit`.
    pub is_final: bool,
    /// Name of the terminal tool that triggered `is_final`, if any.
    pub final_tool_name: Option<String>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            is_final: false,
            final_tool_name: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            is_final: false,
            final_tool_name: None,
        }
    }

    /// Mark this result as a terminal tool call for the given tool name.
    pub fn finalize(mut self, tool_name: impl Into<String>) -> Self {
        self.is_final = true;
        self.final_tool_name = Some(tool_name.into());
        self
    }

    /// Render the result as the plain-text content of the subsequent tool-role message,
    /// truncating per [`truncate_response`].
    pub fn to_tool_message_text(&self) -> String {
        let raw = if let Some(err) = &self.error {
            format!("Error: {}", err)
        } else {
            match &self.output {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            }
        };
        truncate_response(&raw)
    }
}

/// JSON-schema-compatible parameter type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub items: Option<Box<ToolParameterType>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            items: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(Box::new(item_type));
        self
    }
}

/// Tool description surfaced to the LLM.
///
/// Names follow the schema-generation rules in §4.4: camel/Pascal identifiers are converted to
/// `snake_case`; nullable/optional parameters are omitted from `required`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Build the OpenAI-compatible `tools[]` entry for this metadata.
    pub fn to_tool_definition(&self) -> crate::client_wrapper::ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut schema = serde_json::json!({ "type": json_type(&param.param_type) });
            if let Some(desc) = &param.description {
                schema["description"] = serde_json::Value::String(desc.clone());
            }
            if param.param_type == ToolParameterType::Array {
                let item_type = param
                    .items
                    .as_deref()
                    .map(json_type)
                    .unwrap_or("string");
                schema["items"] = serde_json::json!({ "type": item_type });
            }
            properties.insert(param.name.clone(), schema);
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        crate::client_wrapper::ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": serde_json::Value::Object(properties),
                "required": required,
            }),
        }
    }
}

fn json_type(t: &ToolParameterType) -> &'static str {
    match t {
        ToolParameterType::String => "string",
        ToolParameterType::Number => "number",
        ToolParameterType::Integer => "integer",
        ToolParameterType::Boolean => "boolean",
        ToolParameterType::Array => "array",
        ToolParameterType::Object => "object",
    }
}

/// Convert a camelCase or PascalCase identifier to snake_case, per the schema-generation rules.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.char_indices() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Read-only-by-convention bundle of shared state passed to every tool handler.
///
/// Cheaply `Clone`-able: every field is an `Arc`. Mirrors the "Tool context is a value carrying
/// read-only references" ownership note (§3).
#[derive(Clone)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
    pub ticket: TicketHolder,
    pub api_client: Arc<ApiClient>,
    pub hub_client: Arc<HubClient>,
    pub memories: Arc<Mutex<Memories>>,
    pub persistent_shells: PersistentShellTable,
    /// Child of the calling phase's token; tools that spawn their own nested work (sub-agents,
    /// persistent shells) derive further children from this rather than rolling their own root.
    pub cancellation: CancellationToken,
    pub subtask_id: Option<String>,
    pub web_search: Arc<WebSearchConfig>,
    /// Provider list and prompt the sub-agent spawn tool uses for its own nested conversation.
    pub llm_configs: Arc<Vec<LLMConfig>>,
    pub subagent_prompt: Arc<String>,
}

/// Errors raised by registry-level dispatch (unknown tool name, bad schema). Tool *execution*
/// failures never surface here — they're carried in [`ToolResult::error`] instead.
#[derive(Debug, Clone)]
pub enum ToolDispatchError {
    NotFound(String),
    InvalidArguments(String),
}

impl fmt::Display for ToolDispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolDispatchError::NotFound(name) => write!(f, "Unknown tool '{}'", name),
            ToolDispatchError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
        }
    }
}

impl Error for ToolDispatchError {}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult;
}

pub struct Tool {
    metadata: ToolMetadata,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    pub fn new(metadata: ToolMetadata, handler: Arc<dyn ToolHandler>) -> Self {
        Self { metadata, handler }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    pub async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        self.handler.call(args, ctx).await
    }
}

/// Tool set bound to one conversation (one phase's role).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.metadata.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn tool_definitions(&self) -> Vec<crate::client_wrapper::ToolDefinition> {
        self.tools.values().map(|t| t.metadata.to_tool_definition()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Validate that `args` carries no keys outside the tool's declared schema — used by the
    /// XML fallback parser, which must reject hallucinated extra arguments (§4.3 step 6).
    pub fn validate_no_extra_keys(&self, name: &str, args: &serde_json::Value) -> bool {
        let Some(tool) = self.tools.get(name) else {
            return false;
        };
        let Some(obj) = args.as_object() else {
            return true;
        };
        let allowed: std::collections::HashSet<&str> = tool
            .metadata
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        obj.keys().all(|k| allowed.contains(k.as_str()))
    }

    pub async fn execute(&self, name: &str, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => ToolResult::failure(format!("Unknown tool '{}'", name)),
        }
    }
}
