//! Settings file and prompt directory loading (§6, §10.3).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LLMConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub context_length: usize,
    #[serde(default)]
    pub input_token_price: f64,
    #[serde(default)]
    pub output_token_price: f64,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default)]
    pub repository_url: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionMode {
    None,
    Summarize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionConfig {
    #[serde(rename = "type")]
    pub mode: CompactionMode,
    #[serde(default = "default_context_size_percent")]
    pub context_size_percent: f64,
}

fn default_context_size_percent() -> f64 {
    0.9
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            mode: CompactionMode::None,
            context_size_percent: default_context_size_percent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Orchestrator policy knobs resolved from Open Question decisions in SPEC_FULL.md.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(default = "default_nudge_threshold")]
    pub nudge_threshold: u32,
    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: u32,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_nudge_threshold() -> u32 {
    3
}

fn default_reset_threshold() -> u32 {
    7
}

fn default_max_tool_iterations() -> u32 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            nudge_threshold: default_nudge_threshold(),
            reset_threshold: default_reset_threshold(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub llm_configs: Vec<LLMConfig>,
    #[serde(default)]
    pub git_config: GitConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub json_logging: bool,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::MissingSettingsFile(path.display().to_string()))?;
        let settings: Settings =
            serde_json::from_str(&text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        if settings.llm_configs.is_empty() {
            return Err(ConfigError::NoLlmConfigs);
        }
        Ok(settings)
    }
}

/// Required prompt roles at startup (§4.1 step 1).
pub const REQUIRED_PROMPT_ROLES: [&str; 5] = [
    "planning",
    "developer",
    "subagent",
    "compaction",
    "qualityassurance",
];

#[derive(Debug, Clone)]
pub struct Prompts {
    templates: HashMap<String, String>,
}

impl Prompts {
    /// Load every `<role>.txt` file in `dir` and assert the required roles are present.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut templates = HashMap::new();
        for role in REQUIRED_PROMPT_ROLES {
            let path = dir.join(format!("{}.txt", role));
            let text = std::fs::read_to_string(&path)
                .map_err(|_| ConfigError::MissingPrompt(role.to_string()))?;
            templates.insert(role.to_string(), text);
        }
        // Any extra prompt files (e.g. a deployment's own roles) are loaded too, but not required.
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if !templates.contains_key(stem) {
                            if let Ok(text) = std::fs::read_to_string(&path) {
                                templates.insert(stem.to_string(), text);
                            }
                        }
                    }
                }
            }
        }
        Ok(Self { templates })
    }

    /// Render `{repoDir}` / `{currentDate}` / `{ticketId}` placeholders for `role`.
    pub fn render(&self, role: &str, repo_dir: &str, current_date: &str, ticket_id: &str) -> Option<String> {
        self.templates.get(role).map(|tpl| {
            tpl.replace("{repoDir}", repo_dir)
                .replace("{currentDate}", current_date)
                .replace("{ticketId}", ticket_id)
        })
    }
}
