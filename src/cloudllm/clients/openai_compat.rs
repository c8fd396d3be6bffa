//! Single-provider OpenAI-compatible chat client with rate-limit backoff and tool-choice
//! downgrade.
//!
//! One [`OpenAiCompatClient`] wraps one [`crate::settings::LLMConfig`] entry. Falling back to
//! the *next* configured provider once this client's own retry budget is exhausted is the
//! responsibility of the caller (see [`crate::engine`]) — this type only owns the retry policy
//! for a single endpoint, matching the per-provider retry cap described for the conversation
//! engine's per-turn algorithm.

use crate::client_wrapper::{ClientWrapper, Message, MessageStreamFuture, TokenUsage, ToolDefinition};
use crate::clients::common::{get_shared_http_client, parse_chat_response, send_chat_request};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default OpenAI Chat Completions base URL, used when a config's endpoint is empty.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Number of same-provider attempts allowed for a rate-limited request before giving up on it.
pub const RATE_LIMIT_RETRY_CAP: u32 = 3;

/// Number of same-provider attempts allowed for 5xx/transport failures before giving up on it.
const TRANSPORT_RETRY_CAP: u32 = 2;

/// `tool_choice` downgrade ladder: Required -> Auto -> Omit.
const TOOL_CHOICE_LADDER: [Option<&str>; 3] = [Some("required"), Some("auto"), None];

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    model: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl OpenAiCompatClient {
    /// `endpoint` of `None` or empty falls back to [`DEFAULT_BASE_URL`].
    pub fn new(api_key: &str, model: &str, endpoint: Option<&str>) -> Self {
        let base_url = match endpoint {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => DEFAULT_BASE_URL.to_string(),
        };
        Self {
            base_url,
            api_key: api_key.to_string(),
            model: model.to_string(),
            usage: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_with_retry(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, Box<dyn Error>> {
        let http_client = get_shared_http_client();
        let mut tool_choice_rung = 0usize;
        let mut rate_limit_attempts = 0u32;
        let mut transport_attempts = 0u32;

        loop {
            let tool_choice = if tools.is_empty() {
                None
            } else {
                TOOL_CHOICE_LADDER[tool_choice_rung.min(TOOL_CHOICE_LADDER.len() - 1)]
            };

            let response = send_chat_request(
                &self.base_url,
                &self.api_key,
                &self.model,
                messages,
                tools,
                tool_choice,
                http_client,
            )
            .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    transport_attempts += 1;
                    log::warn!(
                        "openai_compat: transport error talking to {} ({}/{}): {}",
                        self.base_url,
                        transport_attempts,
                        TRANSPORT_RETRY_CAP,
                        e
                    );
                    if transport_attempts > TRANSPORT_RETRY_CAP {
                        return Err(Box::new(ProviderError::Transport(e.to_string())));
                    }
                    continue;
                }
            };

            if response.status.as_u16() == 429 || is_rate_limited_body(&response.body) {
                rate_limit_attempts += 1;
                if rate_limit_attempts > RATE_LIMIT_RETRY_CAP {
                    log::warn!(
                        "openai_compat: rate-limit retry cap exceeded for model '{}'",
                        self.model
                    );
                    return Err(Box::new(ProviderError::RateLimitExhausted(
                        self.model.clone(),
                    )));
                }
                let delay = retry_delay_seconds(&response.headers).unwrap_or(1.0);
                log::warn!(
                    "openai_compat: rate limited by {} (attempt {}/{}), sleeping {:.1}s",
                    self.base_url,
                    rate_limit_attempts,
                    RATE_LIMIT_RETRY_CAP,
                    delay
                );
                tokio::time::sleep(Duration::from_secs_f64(delay.max(0.0))).await;
                continue;
            }

            if response.status.as_u16() == 400 && body_mentions_tool_choice(&response.body) {
                if tool_choice_rung + 1 < TOOL_CHOICE_LADDER.len() {
                    tool_choice_rung += 1;
                    log::warn!(
                        "openai_compat: provider rejected tool_choice, downgrading to rung {}",
                        tool_choice_rung
                    );
                    continue;
                }
                return Err(Box::new(ProviderError::Http {
                    status: response.status.as_u16(),
                    body: response.body,
                }));
            }

            if response.status.is_server_error() {
                transport_attempts += 1;
                log::warn!(
                    "openai_compat: HTTP {} from {} (attempt {}/{})",
                    response.status,
                    self.base_url,
                    transport_attempts,
                    TRANSPORT_RETRY_CAP
                );
                if transport_attempts > TRANSPORT_RETRY_CAP {
                    return Err(Box::new(ProviderError::Http {
                        status: response.status.as_u16(),
                        body: response.body,
                    }));
                }
                continue;
            }

            if !response.status.is_success() {
                log::error!(
                    "openai_compat: HTTP {} from {}: {}",
                    response.status,
                    self.base_url,
                    response.body
                );
                return Err(Box::new(ProviderError::Http {
                    status: response.status.as_u16(),
                    body: response.body,
                }));
            }

            return parse_chat_response(&response.body, &self.usage)
                .await
                .map_err(|e| -> Box<dyn Error> {
                    Box::new(ProviderError::MalformedResponse(e.to_string()))
                });
        }
    }
}

fn is_rate_limited_body(body: &str) -> bool {
    let parsed: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let code = parsed
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    code.contains("rate_limit")
        || parsed
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(|t| t.as_str())
            .map(|t| t.contains("rate_limit"))
            .unwrap_or(false)
}

fn body_mentions_tool_choice(body: &str) -> bool {
    body.to_ascii_lowercase().contains("tool_choice")
}

/// Derive a retry-delay in seconds from rate-limit response headers.
///
/// Recognizes `Retry-After` (seconds, or an HTTP date) and `X-RateLimit-Reset` (seconds or
/// millisecond epoch — distinguished by magnitude).
fn retry_delay_seconds(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    if let Some(v) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = v.trim().parse::<f64>() {
            return Some(secs);
        }
    }
    if let Some(v) = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
    {
        if let Ok(raw) = v.trim().parse::<f64>() {
            // Millisecond epochs are ~13 digits; second epochs are much smaller.
            let epoch_seconds = if raw > 1.0e12 { raw / 1000.0 } else { raw };
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            return Some(epoch_seconds - now);
        }
    }
    None
}

#[async_trait]
impl ClientWrapper for OpenAiCompatClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        let tools = tools.unwrap_or_default();
        self.send_with_retry(messages, &tools).await
    }

    fn send_message_stream<'a>(
        &'a self,
        _messages: &'a [Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}
