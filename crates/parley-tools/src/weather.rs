//! get_weather tool: current conditions from weatherapi.com.

use serde::Deserialize;
use tracing::debug;

use parley_providers::ToolDefinition;

use crate::ToolError;

pub const DEFAULT_URL: &str = "https://api.weatherapi.com/v1/current.json";

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    location: Location,
    current: Current,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct Current {
    temp_c: f64,
    humidity: f64,
    wind_kph: f64,
    condition: Condition,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: u32,
    message: String,
}

// weatherapi.com error codes for missing/invalid/disabled keys.
const KEY_ERROR_CODES: [u32; 4] = [1002, 2006, 2007, 2008];

fn describe(body: &CurrentResponse) -> String {
    let place = [&body.location.name, &body.location.region, &body.location.country]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Weather for {place}: {}, {}°C, humidity {}%, wind {} kph.",
        body.current.condition.text,
        body.current.temp_c,
        body.current.humidity,
        body.current.wind_kph
    )
}

fn classify_error(status: u16, body: &str) -> ToolError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(e) if KEY_ERROR_CODES.contains(&e.error.code) => {
            ToolError::Unauthorized { service: "weather" }
        }
        Ok(e) => ToolError::Upstream {
            service: "weather",
            message: e.error.message,
        },
        Err(_) if status == 401 || status == 403 => ToolError::Unauthorized { service: "weather" },
        Err(_) => ToolError::Upstream {
            service: "weather",
            message: format!("HTTP {status}"),
        },
    }
}

pub(crate) async fn current(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    location: &str,
) -> Result<String, ToolError> {
    debug!(location, "get_weather");
    let response = client
        .get(url)
        .query(&[("key", api_key), ("q", location)])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(classify_error(status.as_u16(), &body));
    }

    let parsed: CurrentResponse = serde_json::from_str(&body).map_err(|e| ToolError::Upstream {
        service: "weather",
        message: format!("unexpected response: {e}"),
    })?;
    Ok(describe(&parsed))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather".into(),
        description: "Get the current weather conditions for a city or place.".into(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City or place name, e.g. 'Paris'"
                }
            },
            "required": ["location"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARIS: &str = r#"{
        "location": {"name": "Paris", "region": "Ile-de-France", "country": "France"},
        "current": {"temp_c": 15.0, "humidity": 72, "wind_kph": 11.2, "condition": {"text": "Partly cloudy"}}
    }"#;

    #[test]
    fn test_describe() {
        let body: CurrentResponse = serde_json::from_str(PARIS).unwrap();
        assert_eq!(
            describe(&body),
            "Weather for Paris, Ile-de-France, France: Partly cloudy, 15°C, humidity 72%, wind 11.2 kph."
        );
    }

    #[test]
    fn test_classify_error() {
        let invalid = r#"{"error":{"code":2006,"message":"API key provided is invalid"}}"#;
        assert!(matches!(
            classify_error(401, invalid),
            ToolError::Unauthorized { .. }
        ));

        let not_found = r#"{"error":{"code":1006,"message":"No matching location found."}}"#;
        match classify_error(400, not_found) {
            ToolError::Upstream { message, .. } => assert_eq!(message, "No matching location found."),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(classify_error(403, "nope"), ToolError::Unauthorized { .. }));
        assert!(matches!(classify_error(502, "bad gateway"), ToolError::Upstream { .. }));
    }
}
