use oauth2::{ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername, TokenUrl};
use serde::Deserialize;
use typed_builder::TypedBuilder;

use super::{parse_auth_type, parse_token_url, require_keys, ClientAuth, FormParams, Grant};
use crate::error::Result;

/// Configuration of [`PasswordGrant`].
#[derive(Clone, Default, Deserialize, TypedBuilder, veil::Redact)]
#[serde(default)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct PasswordConfig {
    pub client_id: Option<String>,
    #[redact]
    pub client_secret: Option<String>,
    pub username: Option<String>,
    #[redact]
    pub password: Option<String>,
    pub token_url: Option<String>,
    pub scope: Option<String>,
    /// `basic` (default) or `request_body`.
    pub auth_type: Option<String>,
}

/// The resource owner `password` grant (RFC 6749 section 4.3).
#[derive(Debug, Clone)]
pub struct PasswordGrant {
    auth: ClientAuth,
    username: ResourceOwnerUsername,
    password: ResourceOwnerPassword,
    token_url: TokenUrl,
    scope: Option<String>,
}

impl PasswordGrant {
    /// Validate `config` and create the grant.
    ///
    /// # Errors
    /// - [`Error::MissingConfig`](crate::Error::MissingConfig) listing every missing key of
    ///   `client_id`, `client_secret`, `username`, `password` and `token_url`.
    /// - [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `token_url` or `auth_type` is invalid.
    pub fn new(config: PasswordConfig) -> Result<Self> {
        require_keys(&[
            ("client_id", config.client_id.as_deref()),
            ("client_secret", config.client_secret.as_deref()),
            ("username", config.username.as_deref()),
            ("password", config.password.as_deref()),
            ("token_url", config.token_url.as_deref()),
        ])?;

        Ok(Self {
            auth: ClientAuth::new(
                ClientId::new(config.client_id.unwrap_or_default()),
                ClientSecret::new(config.client_secret.unwrap_or_default()),
                parse_auth_type(config.auth_type.as_deref())?,
            ),
            username: ResourceOwnerUsername::new(config.username.unwrap_or_default()),
            password: ResourceOwnerPassword::new(config.password.unwrap_or_default()),
            token_url: parse_token_url(config.token_url.unwrap_or_default())?,
            scope: config.scope,
        })
    }
}

impl Grant for PasswordGrant {
    fn name(&self) -> &str {
        "password"
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
            .set("username", self.username.as_str())
            .set("password", self.password.secret())
            .set("scope", self.scope.as_deref().unwrap_or_default());
        self.auth.append_to_body(&mut params);
        params.merge(overrides);
        Ok(params)
    }
}
