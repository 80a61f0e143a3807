//! API key storage via the OS keychain/credential manager, with an
//! environment-variable fallback for headless setups.

use keyring::Entry;

const SERVICE_NAME: &str = "com.easyrename.core";

/// Environment fallback checked when the keychain has no entry.
const ENV_FALLBACK: &str = "GEMINI_API_KEY";

pub struct CredentialManager;

impl CredentialManager {
    /// Store an API key for a provider ("gemini").
    pub fn store_api_key(provider: &str, api_key: &str) -> Result<(), String> {
        let entry = Entry::new(SERVICE_NAME, provider)
            .map_err(|e| format!("Keychain unavailable: {}", e))?;
        entry
            .set_password(api_key)
            .map_err(|e| format!("Failed to store API key: {}", e))?;
        tracing::debug!("[Credentials] Stored API key for {}", provider);
        Ok(())
    }

    /// Retrieve an API key, preferring the keychain over the environment.
    pub fn get_api_key(provider: &str) -> Result<String, String> {
        if let Ok(entry) = Entry::new(SERVICE_NAME, provider) {
            if let Ok(password) = entry.get_password() {
                return Ok(password);
            }
        }

        if let Ok(key) = std::env::var(ENV_FALLBACK) {
            if !key.trim().is_empty() {
                tracing::debug!("[Credentials] Using {} from environment", ENV_FALLBACK);
                return Ok(key);
            }
        }

        Err(format!("API key not found for {}", provider))
    }

    pub fn delete_api_key(provider: &str) -> Result<(), String> {
        if let Ok(entry) = Entry::new(SERVICE_NAME, provider) {
            let _ = entry.delete_credential();
            tracing::debug!("[Credentials] Deleted API key for {}", provider);
        }
        Ok(())
    }

    /// Whether an API key is configured at all.
    pub fn has_api_key(provider: &str) -> bool {
        Self::get_api_key(provider).is_ok()
    }
}
