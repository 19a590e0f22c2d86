use oauth2::{ClientId, ClientSecret, TokenUrl};
use serde::Deserialize;
use typed_builder::TypedBuilder;

use super::{parse_auth_type, parse_token_url, require_keys, ClientAuth, FormParams, Grant};
use crate::error::Result;

/// Configuration of [`ClientCredentialsGrant`].
///
/// Can be deserialized from a flat map. Unknown keys are ignored.
#[derive(Clone, Default, Deserialize, TypedBuilder, veil::Redact)]
#[serde(default)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct ClientCredentialsConfig {
    pub client_id: Option<String>,
    #[redact]
    pub client_secret: Option<String>,
    pub token_url: Option<String>,
    pub scope: Option<String>,
    /// `basic` (default) or `request_body`.
    pub auth_type: Option<String>,
}

/// The `client_credentials` grant (RFC 6749 section 4.4).
#[derive(Debug, Clone)]
pub struct ClientCredentialsGrant {
    auth: ClientAuth,
    token_url: TokenUrl,
    scope: Option<String>,
}

impl ClientCredentialsGrant {
    /// Validate `config` and create the grant.
    ///
    /// # Errors
    /// - [`Error::MissingConfig`](crate::Error::MissingConfig) listing every missing
    ///   key of `client_id`, `client_secret` and `token_url`.
    /// - [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `token_url` or `auth_type` is invalid.
    pub fn new(config: ClientCredentialsConfig) -> Result<Self> {
        require_keys(&[
            ("client_id", config.client_id.as_deref()),
            ("client_secret", config.client_secret.as_deref()),
            ("token_url", config.token_url.as_deref()),
        ])?;

        Ok(Self {
            auth: ClientAuth::new(
                ClientId::new(config.client_id.unwrap_or_default()),
                ClientSecret::new(config.client_secret.unwrap_or_default()),
                parse_auth_type(config.auth_type.as_deref())?,
            ),
            token_url: parse_token_url(config.token_url.unwrap_or_default())?,
            scope: config.scope,
        })
    }
}

impl Grant for ClientCredentialsGrant {
    fn name(&self) -> &str {
        "client_credentials"
    }

    fn token_url(&self) -> &TokenUrl {
        &self.token_url
    }

    fn client_auth(&self) -> Option<&ClientAuth> {
        Some(&self.auth)
    }

    fn build_token_request_body(&self, overrides: &[(String, String)]) -> Result<FormParams> {
        let mut params = FormParams::new();
        params
            .set("grant_type", self.name())
            .set("scope", self.scope.as_deref().unwrap_or_default());
        self.auth.append_to_body(&mut params);
        params.merge(overrides);
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Error;

    #[test]
    fn test_missing_config() {
        let result = ClientCredentialsGrant::new(ClientCredentialsConfig::default());
        match result {
            Err(Error::MissingConfig { keys }) => {
                assert_eq!(keys, vec!["client_id", "client_secret", "token_url"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_config_from_map_ignores_unknown_keys() {
        let config: ClientCredentialsConfig = serde_json::from_value(serde_json::json!({
            "client_id": "my-client",
            "client_secret": "my-secret",
            "token_url": "https://identity.example.com/oauth2/token",
            "unknown": "ignored"
        }))
        .unwrap();
        let grant = ClientCredentialsGrant::new(config).unwrap();

        assert_eq!(
            grant.token_url().as_str(),
            "https://identity.example.com/oauth2/token"
        );
        assert_eq!(
            grant.build_token_request_body(&[]).unwrap().encode(),
            "grant_type=client_credentials&scope="
        );
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let config = ClientCredentialsConfig::builder()
            .client_id("my-client")
            .client_secret("my-super-secret")
            .build();
        assert!(!format!("{config:?}").contains("my-super-secret"));
    }

    #[test]
    fn test_body_with_scope_and_overrides() {
        let grant = ClientCredentialsGrant::new(
            ClientCredentialsConfig::builder()
                .client_id("my-client")
                .client_secret("my-secret")
                .token_url("https://identity.example.com/oauth2/token")
                .scope("my-scope")
                .build(),
        )
        .unwrap();

        let body = grant
            .build_token_request_body(&[
                ("grant_type".to_string(), "password".to_string()),
                ("audience".to_string(), "my-api".to_string()),
            ])
            .unwrap();
        assert_eq!(
            body.encode(),
            "grant_type=client_credentials&scope=my-scope&audience=my-api"
        );
    }

    #[test]
    fn test_request_body_auth() {
        let grant = ClientCredentialsGrant::new(
            ClientCredentialsConfig::builder()
                .client_id("my-client")
                .client_secret("my-secret")
                .token_url("https://identity.example.com/oauth2/token")
                .auth_type("request_body")
                .build(),
        )
        .unwrap();

        assert_eq!(
            grant.build_token_request_body(&[]).unwrap().encode(),
            "grant_type=client_credentials&scope=&client_id=my-client&client_secret=my-secret"
        );
    }

    #[test]
    fn test_invalid_token_url() {
        let result = ClientCredentialsGrant::new(
            ClientCredentialsConfig::builder()
                .client_id("my-client")
                .client_secret("my-secret")
                .token_url("not a url")
                .build(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
