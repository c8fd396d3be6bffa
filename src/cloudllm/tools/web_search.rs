//! `web.search` (§4.4).
//!
//! Queries the configured search endpoint, fetches each hit, and strips the fetched page down to
//! plain text. Domain/SSRF checks and the streamed-with-cap response read are grounded on the
//! teacher's `HttpClient` (`check_ssrf_blocked`/`build_response`); this tool only ever talks to
//! the one configured endpoint and whatever URLs it returns, so there is no allow/deny-list
//! configuration surface to expose to the LLM.

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

fn is_ssrf_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 127
                || (o[0] == 169 && o[1] == 254)
                || o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn extract_host(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    Some(rest.split('/').next()?.split(':').next()?.to_string())
}

async fn check_ssrf_blocked(host: &str) -> Result<(), String> {
    let host_owned = host.to_string();
    let addrs = tokio::task::spawn_blocking(move || {
        use std::net::ToSocketAddrs;
        format!("{}:80", host_owned).to_socket_addrs()
    })
    .await
    .map_err(|e| format!("DNS resolution task failed: {}", e))?
    .map_err(|e| format!("could not resolve host '{}': {}", host, e))?;

    for addr in addrs {
        if is_ssrf_ip(addr.ip()) {
            return Err(format!("target IP {} is in a reserved/private range", addr.ip()));
        }
    }
    Ok(())
}

/// Strip `<script>`/`<style>` blocks and remaining tags, decode a handful of common HTML
/// entities, and collapse runs of whitespace (§4.4).
fn html_to_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut chars = html.char_indices().peekable();
    let lower = html.to_lowercase();

    let mut i = 0;
    while i < html.len() {
        if lower[i..].starts_with("<script") || lower[i..].starts_with("<style") {
            if let Some(end) = lower[i..].find('>') {
                let tag_end = i + end + 1;
                let close_tag = if lower[i..].starts_with("<script") { "</script>" } else { "</style>" };
                if let Some(close) = lower[tag_end..].find(close_tag) {
                    i = tag_end + close + close_tag.len();
                    continue;
                }
                i = tag_end;
                continue;
            }
        }
        if html.as_bytes()[i] == b'<' {
            if let Some(end) = html[i..].find('>') {
                i += end + 1;
                continue;
            }
        }
        let ch = html[i..].chars().next().unwrap();
        stripped.push(ch);
        i += ch.len_utf8();
    }
    let _ = &mut chars;

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn fetch_page_text(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let host = extract_host(url).ok_or_else(|| "could not extract host from URL".to_string())?;
    check_ssrf_blocked(&host).await?;

    let response = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;

    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("failed reading body: {}", e))?;
        if body.len() + chunk.len() > MAX_PAGE_BYTES {
            break;
        }
        body.extend_from_slice(&chunk);
    }
    let html = String::from_utf8_lossy(&body);
    Ok(html_to_text(&html))
}

struct WebSearch;

#[async_trait]
impl ToolHandler for WebSearch {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if !ctx.web_search.enabled {
            return ToolResult::failure("web search is not enabled for this ticket");
        }
        let Some(endpoint) = ctx.web_search.endpoint.as_deref() else {
            return ToolResult::failure("web search has no endpoint configured");
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'query'");
        };

        let client = reqwest::Client::new();
        let mut request = client
            .get(endpoint)
            .query(&[("q", query)])
            .timeout(FETCH_TIMEOUT);
        if let Some(key) = &ctx.web_search.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("search request failed: {}", e)),
        };
        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return ToolResult::failure(format!("search response was not JSON: {}", e)),
        };

        let urls: Vec<String> = body
            .get("results")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| r.get("url").and_then(|u| u.as_str()).map(str::to_string))
                    .take(5)
                    .collect()
            })
            .unwrap_or_default();

        let mut pages = Vec::new();
        for url in &urls {
            match fetch_page_text(&client, url).await {
                Ok(text) => pages.push(serde_json::json!({ "url": url, "text": text })),
                Err(e) => pages.push(serde_json::json!({ "url": url, "error": e })),
            }
        }

        ToolResult::success(serde_json::json!({ "results": pages }))
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("web_search", "Search the web and fetch plain-text page contents.")
            .with_parameter(ToolParameter::new("query", ToolParameterType::String).required()),
        Arc::new(WebSearch),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style_blocks() {
        let html = "<html><head><style>.x{color:red}</style></head><body><script>alert(1)</script><p>Hello&nbsp;World</p></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(html_to_text("A &amp; B &lt;tag&gt;"), "A & B <tag>");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(html_to_text("<p>a   \n\n  b</p>"), "a b");
    }

    #[test]
    fn loopback_is_ssrf_blocked() {
        assert!(is_ssrf_ip("127.0.0.1".parse().unwrap()));
        assert!(is_ssrf_ip("169.254.169.254".parse().unwrap()));
        assert!(!is_ssrf_ip("8.8.8.8".parse().unwrap()));
    }
}
