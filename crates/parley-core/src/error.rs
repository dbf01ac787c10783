use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing API key(s): {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_message() {
        let err = ParleyError::MissingKeys(vec!["gemini".into(), "murf".into()]);
        assert_eq!(err.to_string(), "Missing API key(s): gemini, murf");
    }
}
