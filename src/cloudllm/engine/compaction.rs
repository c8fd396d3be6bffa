//! Context-window compaction and memory hoisting (§4.3.1).
//!
//! Grounded on the teacher's self-compressing context strategy: summarize via a dedicated
//! system prompt, then pull `LABEL: text` lines back out of the summary into long-lived state.

use crate::engine::session::{Conversation, Memories};
use crate::settings::{CompactionConfig, CompactionMode};
use crate::client_wrapper::{Message, Role};
use std::sync::Arc;

/// Below this projected byte size, compaction is skipped even if the percentage threshold is
/// crossed — summarizing a trivial context wastes a call for no benefit.
const MIN_SIZE_BEFORE_SUMMARIZE: usize = 3 * 1024;

/// Rough bytes-per-token used to translate `contextLength` (tokens) into a byte budget.
const BYTES_PER_TOKEN: usize = 4;

pub enum CompactionTrigger {
    /// Normal per-turn threshold check (§4.3 step 11).
    Threshold,
    /// Forced regardless of threshold, e.g. at the end of a successful developer subtask.
    CompactNow,
}

/// Whether a compaction pass should run before the next turn.
pub fn should_compact(
    conversation: &Conversation,
    memories: &Memories,
    context_length_tokens: usize,
    config: &CompactionConfig,
    trigger: CompactionTrigger,
) -> bool {
    if config.mode == CompactionMode::None {
        return false;
    }
    let projected = conversation.projected_byte_size(memories);
    if projected < MIN_SIZE_BEFORE_SUMMARIZE {
        return false;
    }
    match trigger {
        CompactionTrigger::CompactNow => true,
        CompactionTrigger::Threshold => {
            let budget = (context_length_tokens * BYTES_PER_TOKEN) as f64 * config.context_size_percent;
            projected as f64 > budget
        }
    }
}

struct ParsedSummary {
    summary_text: String,
    memory_lines: Vec<(String, String)>,
}

/// Pull the `<summary>...</summary>` block and any `LABEL: text` lines out of a compaction
/// response. Returns `None` if no summary block is present (treated as a failed compaction).
fn parse_summary_response(raw: &str) -> Option<ParsedSummary> {
    let lower = raw.to_lowercase();
    let start_tag = lower.find("<summary>")?;
    let end_tag = lower.find("</summary>")?;
    if end_tag <= start_tag {
        return None;
    }
    let inner_start = start_tag + "<summary>".len();
    let summary_text = raw[inner_start..end_tag].trim().to_string();
    if summary_text.is_empty() {
        return None;
    }

    let mut memory_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if let Some(colon) = line.find(':') {
            let (label, rest) = line.split_at(colon);
            let label = label.trim();
            let text = rest[1..].trim();
            if !label.is_empty()
                && !text.is_empty()
                && label.chars().all(|c| c.is_ascii_uppercase() || c == '_')
            {
                memory_lines.push((label.to_string(), text.to_string()));
            }
        }
    }

    Some(ParsedSummary {
        summary_text,
        memory_lines,
    })
}

/// Apply a compaction response: on success, replace history with a single summarizing message
/// and hoist labelled lines into `memories`, never expanding the projected size. On failure
/// (unparseable response, or the "summary" would be larger than what it replaces), leaves the
/// conversation untouched and returns a warning to surface on the activity log.
pub fn apply_compaction(conversation: &mut Conversation, memories: &mut Memories, raw_response: &str) -> Result<(), String> {
    let before = conversation.projected_byte_size(memories);
    let Some(parsed) = parse_summary_response(raw_response) else {
        return Err("compaction response did not contain a <summary> block; history left untouched".to_string());
    };

    for (label, text) in &parsed.memory_lines {
        memories.add(label, text);
    }

    let old_history = conversation.history().to_vec();
    let new_history = vec![Message {
        role: Role::User,
        content: Arc::from(format!("Context summary:\n{}\n\nContinue the task.", parsed.summary_text).as_str()),
        tool_calls: vec![],
    }];
    conversation.replace_history(new_history);

    let after = conversation.projected_byte_size(memories);
    if after > before {
        conversation.replace_history(old_history);
        return Err("compaction did not shrink the conversation; left untouched".to_string());
    }
    Ok(())
}
