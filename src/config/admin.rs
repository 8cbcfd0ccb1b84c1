//! Admin API configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Admin API settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    /// Static key expected in `X-Admin-Key`. Unset leaves the admin API open.
    pub api_key: Option<SecretString>,
}

impl AdminConfig {
    /// The key, ignoring blank values.
    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_counts_as_unset() {
        let config = AdminConfig {
            api_key: Some(SecretString::new(String::new())),
        };
        assert!(config.api_key().is_none());
        assert!(AdminConfig::default().api_key().is_none());
    }
}
