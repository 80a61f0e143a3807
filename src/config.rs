//! AI configuration consumed by the metadata extractor.
//!
//! The key is an explicit value injected at construction (never read from
//! ambient global state inside the client), so tests and hosts can supply
//! fakes.

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialManager;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider name used for credential lookup.
pub const AI_PROVIDER: &str = "gemini";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// API key; empty means AI analysis is unavailable (precondition
    /// checked synchronously before any request).
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    /// Upper bound on the text excerpt sent to the service.
    pub max_excerpt_chars: usize,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_excerpt_chars: 12_000,
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Build a config from the stored credential, falling back to an empty
    /// key (the extractor then fails fast with the precondition error).
    pub fn from_stored_credentials() -> Self {
        let api_key = CredentialManager::get_api_key(AI_PROVIDER).unwrap_or_default();
        Self::with_api_key(api_key)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_key() {
        let config = AiConfig::default();
        assert!(!config.has_api_key());
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_whitespace_key_does_not_count() {
        assert!(!AiConfig::with_api_key("   ").has_api_key());
        assert!(AiConfig::with_api_key("k").has_api_key());
    }
}
