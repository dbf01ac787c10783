//! Synthesis voice catalogue.

use tracing::debug;

const DEFAULT_VOICES_URL: &str = "https://api.murf.ai/v1/speech/voices";

/// Fetch the voices available to `api_key`, passed through as JSON.
pub async fn list_voices(
    client: &reqwest::Client,
    api_key: &str,
    url: Option<&str>,
) -> anyhow::Result<serde_json::Value> {
    let url = url.unwrap_or(DEFAULT_VOICES_URL);
    debug!(url, "Fetching synthesis voices");

    let response = client
        .get(url)
        .header("Accept", "application/json")
        .header("api-key", api_key)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Voice listing failed ({status}): {body}");
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_lowercase();
            assert!(request.contains("api-key: secret"));
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/v1/speech/voices")
    }

    #[tokio::test]
    async fn test_list_voices_passthrough() {
        let url = serve_once("200 OK", r#"[{"voiceId":"en-US-natalie"}]"#).await;
        let voices = list_voices(&reqwest::Client::new(), "secret", Some(&url))
            .await
            .unwrap();
        assert_eq!(voices[0]["voiceId"], "en-US-natalie");
    }

    #[tokio::test]
    async fn test_list_voices_error_status() {
        let url = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let err = list_voices(&reqwest::Client::new(), "secret", Some(&url))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
