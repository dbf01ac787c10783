//! set_timer tool. The countdown itself runs on the client; the tool only
//! confirms and hands back a `start_timer` effect.

use serde::{Deserialize, Deserializer};
use tracing::debug;

use parley_providers::ToolDefinition;

use crate::calculator::format_number;
use crate::{ClientEffect, ToolError, ToolOutput};

pub(crate) fn default_units() -> String {
    "seconds".to_string()
}

/// Models send durations as integers, floats, or occasionally strings.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Seconds per unit; anything unrecognised counts as seconds.
fn unit_seconds(units: &str) -> u64 {
    let units = units.trim().to_lowercase();
    if units.starts_with("hour") || units.starts_with("hr") || units == "h" {
        3600
    } else if units.starts_with("min") || units == "m" {
        60
    } else {
        1
    }
}

pub(crate) fn run(duration: f64, units: &str) -> Result<ToolOutput, ToolError> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(ToolError::InvalidArguments(format!(
            "timer duration must be positive, got {duration}"
        )));
    }
    let duration_seconds = (duration * unit_seconds(units) as f64).round() as u64;
    debug!(duration, units, duration_seconds, "set_timer");

    Ok(ToolOutput {
        content: format!("Timer successfully set for {} {units}.", format_number(duration)),
        is_error: false,
        effect: Some(ClientEffect::StartTimer { duration_seconds }),
    })
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "set_timer".into(),
        description: "Start a countdown timer on the user's device.".into(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "duration": {
                    "type": "integer",
                    "description": "How long the timer runs, in the given units"
                },
                "units": {
                    "type": "string",
                    "description": "seconds, minutes, or hours"
                }
            },
            "required": ["duration", "units"]
        }),
    }
}
