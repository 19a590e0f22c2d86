use oauth2::{ClientId, ClientSecret, RefreshToken, TokenUrl};
use serde::Deserialize;
use typed_builder::TypedBuilder;

use super::{parse_auth_type, parse_token_url, require_keys, ClientAuth, FormParams, Grant};
use crate::error::Result;

/// Configuration of [`RefreshTokenGrant`].
#[derive(Clone, Default, Deserialize, TypedBuilder, veil::Redact)]
#[serde(default)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct RefreshTokenConfig {
    pub client_id: Option<String>,
    #[redact]
    pub client_secret: Option<String>,
    #[redact]
    pub refresh_token: Option<String>,
    pub token_url: Option<String>,
    pub scope: Option<String>,
    /// `basic` (default) or `request_body`.
    pub auth_type: Option<String>,
}

/// The `refresh_token` grant (RFC 6749 section 6).
///
/// A `refresh_token` override replaces the configured refresh token, which is
/// how [`Oauth2Client`](crate::Oauth2Client) renews a token that came with its own.
#[derive(Debug, Clone)]
pub struct RefreshTokenGrant {
    auth: ClientAuth,
    refresh_token: RefreshToken,
    token_url: TokenUrl,
    scope: Option<String>,
}

impl RefreshTokenGrant {
    /// Validate `config` and create the grant.
    ///
    /// # Errors
    /// - [`Error::MissingConfig`](crate::Error::MissingConfig) listing every missing key of
    ///   `client_id`, `client_secret`, `refresh_token` and `token_url`.
    /// - [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `token_url` or `auth_type` is invalid.
    pub fn new(config: RefreshTokenConfig) -> Result<Self> {
        require_keys(&[
            ("client_id", config.client_id.as_deref()),
            ("client_secret", config.client_secret.as_deref()),
            ("refresh_token", config.refresh_token.as_deref()),
            ("token_url", config.token_url.as_deref()),
        ])?;

        Ok(Self {
            auth: ClientAuth::new(
                ClientId::new(config.client_id.unwrap_or_default()),
                ClientSecret::new(config.client_secret.unwrap_or_default()),
                parse_auth_type(config.auth_type.as_deref())?,
            ),
            refresh_token: RefreshToken::new(config.refresh_token.unwrap_or_default()),
            token_url: parse_token_url(config.token_url.unwrap_or_default())?,
            scope: config.scope,
        })
    }
}

impl Grant for RefreshTokenGrant {
    fn name(&self) -> &str {
        "refresh_token"
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
            .set("refresh_token", self.refresh_token.secret());
        // Unset scope is omitted so the server keeps the originally granted scope (RFC 6749 section 6).
        if let Some(scope) = &self.scope {
            params.set("scope", scope);
        }
        self.auth.append_to_body(&mut params);
        params.merge(overrides);
        Ok(params)
    }
}
