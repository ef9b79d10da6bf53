use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.pentair.cloud/";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for one Pentair account.
///
/// Built once by the caller and handed to the client; nothing in the crate
/// mutates it afterwards.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_pool_id: String,
    pub client_id: String,
    pub identity_pool_id: String,
    pub region: String,
    pub base_url: String,
    pub cognito_idp_url: String,
    pub cognito_identity_url: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        user_pool_id: impl Into<String>,
        client_id: impl Into<String>,
        identity_pool_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            user_pool_id: user_pool_id.into(),
            client_id: client_id.into(),
            identity_pool_id: identity_pool_id.into(),
            cognito_idp_url: format!("https://cognito-idp.{}.amazonaws.com", region),
            cognito_identity_url: format!("https://cognito-identity.{}.amazonaws.com", region),
            region,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Build a config from base64-encoded pool identifiers, the way the
    /// Pentair Home app ships them.
    pub fn from_encoded(
        user_pool_id: &str,
        client_id: &str,
        identity_pool_id: &str,
        region: &str,
    ) -> Result<Self> {
        Ok(Self::new(
            decode(user_pool_id)?,
            decode(client_id)?,
            decode(identity_pool_id)?,
            region,
        ))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Point both Cognito services at custom endpoints (mock servers in tests).
    pub fn with_cognito_urls(
        mut self,
        idp_url: impl Into<String>,
        identity_url: impl Into<String>,
    ) -> Self {
        self.cognito_idp_url = idp_url.into();
        self.cognito_identity_url = identity_url.into();
        self
    }

    /// The `iss` claim of tokens minted by the user pool. Also the key of
    /// the identity-pool login map, minus the scheme.
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    pub fn login_provider(&self) -> String {
        format!(
            "cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    pub fn jwks_url(&self) -> String {
        format!(
            "{}/{}/.well-known/jwks.json",
            self.cognito_idp_url.trim_end_matches('/'),
            self.user_pool_id
        )
    }

    /// Pool name used by SRP: the part of the user pool id after the region.
    pub fn pool_name(&self) -> Result<&str> {
        self.user_pool_id
            .split_once('_')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::Config(format!("Invalid user pool id: {}", self.user_pool_id))
            })
    }
}

/// Decode a base64-encoded configuration value.
pub fn decode(value: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| Error::Config(format!("Invalid encoded value '{}': {}", value, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Config(format!("Encoded value is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_follow_region() {
        let config = ClientConfig::new("us-west-2_abc123", "client", "pool", "us-west-2");
        assert_eq!(config.base_url, "https://api.pentair.cloud/");
        assert_eq!(
            config.cognito_idp_url,
            "https://cognito-idp.us-west-2.amazonaws.com"
        );
        assert_eq!(
            config.cognito_identity_url,
            "https://cognito-identity.us-west-2.amazonaws.com"
        );
        assert_eq!(
            config.login_provider(),
            "cognito-idp.us-west-2.amazonaws.com/us-west-2_abc123"
        );
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_encoded_decodes_values() {
        let config = ClientConfig::from_encoded(
            "dXMtd2VzdC0yX2FiYzEyMw==",
            "Y2xpZW50",
            "cG9vbA==",
            "us-west-2",
        )
        .unwrap();
        assert_eq!(config.user_pool_id, "us-west-2_abc123");
        assert_eq!(config.client_id, "client");
        assert_eq!(config.identity_pool_id, "pool");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not base64!"), Err(Error::Config(_))));
    }

    #[test]
    fn test_pool_name() {
        let config = ClientConfig::new("us-west-2_abc123", "client", "pool", "us-west-2");
        assert_eq!(config.pool_name().unwrap(), "abc123");

        let config = ClientConfig::new("nounderscore", "client", "pool", "us-west-2");
        assert!(config.pool_name().is_err());
    }

    #[test]
    fn test_jwks_url_uses_idp_endpoint() {
        let config = ClientConfig::new("us-west-2_abc123", "client", "pool", "us-west-2")
            .with_cognito_urls("http://127.0.0.1:9000/", "http://127.0.0.1:9001");
        assert_eq!(
            config.jwks_url(),
            "http://127.0.0.1:9000/us-west-2_abc123/.well-known/jwks.json"
        );
    }
}
