//! web_search tool: Tavily search API.

use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_providers::ToolDefinition;

use crate::ToolError;

pub const DEFAULT_URL: &str = "https://api.tavily.com/search";

const MAX_RESULTS: usize = 5;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    content: String,
}

/// Bullet list of result snippets.
fn format_results(response: &SearchResponse) -> String {
    let lines: Vec<String> = response
        .results
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .map(|r| format!("- {}", r.content.trim()))
        .collect();
    if lines.is_empty() {
        "No results found.".to_string()
    } else {
        lines.join("\n")
    }
}

pub(crate) async fn search(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    query: &str,
) -> Result<String, ToolError> {
    debug!(query, "web_search");
    let response = client
        .post(url)
        .json(&SearchRequest {
            api_key,
            query,
            search_depth: "basic",
            max_results: MAX_RESULTS,
        })
        .send()
        .await?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ToolError::Unauthorized { service: "Tavily" });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ToolError::Upstream {
            service: "Tavily",
            message: format!("HTTP {status}: {body}"),
        });
    }

    let parsed: SearchResponse = response.json().await?;
    Ok(format_results(&parsed))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "web_search".into(),
        description: "Search the web for current, real-time information.".into(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_format_results() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"results":[{"title":"a","content":"Rust 1.85 released."},{"content":"  "},{"content":"Edition 2024 is stable."}]}"#,
        )
        .unwrap();
        assert_eq!(
            format_results(&response),
            "- Rust 1.85 released.\n- Edition 2024 is stable."
        );

        let empty: SearchResponse = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert_eq!(format_results(&empty), "No results found.");
    }

    #[tokio::test]
    async fn test_invalid_key_maps_to_unauthorized() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = r#"{"detail":{"error":"Unauthorized: missing or invalid API key."}}"#;
            let response = format!(
                "HTTP/1.1 401 Unauthorized\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let err = search(
            &reqwest::Client::new(),
            &format!("http://{addr}/search"),
            "bad",
            "rust news",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Unauthorized { service: "Tavily" }));
    }
}
