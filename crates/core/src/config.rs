use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVariable(String),

    #[error("invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration, loaded once at process start and passed down
/// explicitly. Collaborator clients are built from it per job; nothing here
/// lives in module-level state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the PostgREST-compatible datastore.
    pub store_url: String,
    /// Anonymous API key, sent as the `apikey` header on every store call.
    pub store_anon_key: String,
    /// Elevated key used when a request authenticates as administrator.
    pub store_service_role_key: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub openai_embedding_model: String,
    pub openai_chat_model: String,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_embedding_model: String,
    pub gemini_vision_model: String,
    pub webhook_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store_url: load_env("SUPABASE_URL")?,
            store_anon_key: load_env("SUPABASE_ANON_KEY")?,
            store_service_role_key: load_env("SUPABASE_SERVICE_ROLE_KEY")?,
            openai_api_key: load_env("OPENAI_API_KEY")?,
            openai_api_base: load_env_or("OPENAI_API_BASE", "https://api.openai.com"),
            openai_embedding_model: load_env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
            openai_chat_model: load_env_or("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
            gemini_api_key: load_env("GEMINI_API_KEY")?,
            gemini_api_base: load_env_or(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com",
            ),
            gemini_embedding_model: load_env_or(
                "GEMINI_EMBEDDING_MODEL",
                "gemini-embedding-exp-03-07",
            ),
            gemini_vision_model: load_env_or("GEMINI_VISION_MODEL", "gemini-2.0-flash"),
            webhook_timeout_secs: parse_env_or("WEBHOOK_TIMEOUT_SECS", 5)?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{load_env, load_env_or, parse_env_or};

    #[test]
    fn missing_variable_is_an_error() {
        let result = load_env("BOOK_INGEST_TEST_UNSET_VARIABLE");
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply_when_unset() {
        let value = load_env_or("BOOK_INGEST_TEST_UNSET_VARIABLE", "fallback");
        assert_eq!(value, "fallback");

        let parsed: usize =
            parse_env_or("BOOK_INGEST_TEST_UNSET_VARIABLE", 4).expect("default should parse");
        assert_eq!(parsed, 4);
    }
}
