//! System prompt and per-turn instruction wrapping.

use parley_providers::ToolDefinition;

/// Persona used when `agent.persona` is not configured.
pub const DEFAULT_PERSONA: &str = "You are Parley, a warm and concise voice assistant. \
You speak with the user in real time, so answer the way a helpful person would \
talk: short sentences, no lists, no markdown, no emoji.";

/// Build the system prompt for a session.
pub fn build_system_prompt(persona: Option<&str>, tools: &[ToolDefinition]) -> String {
    let mut parts = vec![persona.unwrap_or(DEFAULT_PERSONA).to_string()];

    if !tools.is_empty() {
        let listing: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        parts.push(format!("Your tools:\n{}", listing.join("\n")));
    }

    parts.push(
        "Core instructions:\n\
         1. Work out what the user wants from their latest message.\n\
         2. If a tool fits the request, call it straight away. Do not ask for permission \
            and do not announce what you are about to do.\n\
         3. After a tool returns, answer the user directly using its result.\n\
         4. If nothing you have can do what was asked, say so politely.\n\
         5. The message comes from speech recognition. If a word looks misheard, \
            assume the most sensible reading before using a tool."
            .to_string(),
    );

    parts.join("\n\n")
}

/// Wrap the user's transcript for the generation request. History keeps the
/// bare transcript.
pub fn wrap_transcript(transcript: &str) -> String {
    format!("The user said: \"{transcript}\"")
}
