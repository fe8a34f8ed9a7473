//! Credential resolution: `${PROVIDER_NAME}_API_KEY` takes precedence
//! over the provider's configured key.

use secrecy::SecretString;

use crate::error::LlmError;

/// Resolve the API key for a provider named `provider_name`, checking
/// `${PROVIDER_NAME}_API_KEY` (upper-cased, non-alphanumeric replaced with
/// `_`) before falling back to `configured`.
pub fn resolve(provider_name: &str, configured: Option<&SecretString>) -> Result<SecretString, LlmError> {
    let env_name = format!(
        "{}_API_KEY",
        provider_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect::<String>()
    );

    if let Ok(value) = std::env::var(&env_name)
        && !value.is_empty()
    {
        return Ok(SecretString::from(value));
    }

    configured
        .cloned()
        .ok_or_else(|| LlmError::AuthenticationFailed(format!("no API key configured for provider '{provider_name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_configured_key() {
        // SAFETY: single-threaded test, no concurrent env access.
        unsafe {
            std::env::remove_var("TESTPROV_API_KEY");
        }

        let configured = SecretString::from("configured-key".to_string());
        let resolved = resolve("testprov", Some(&configured)).unwrap();

        use secrecy::ExposeSecret;
        assert_eq!(resolved.expose_secret(), "configured-key");
    }

    #[test]
    fn missing_key_is_authentication_error() {
        unsafe {
            std::env::remove_var("NOKEY_API_KEY");
        }

        let err = resolve("nokey", None).unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed(_)));
    }
}
