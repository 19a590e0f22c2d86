use chrono::{DateTime, Utc};
use http::HeaderValue;
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// An access token issued by a token endpoint.
///
/// A token without `expires_at` is treated as valid until a request using it
/// is rejected. Secrets are redacted from the `Debug` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    access_token: AccessToken,
    token_type: String,
    refresh_token: Option<RefreshToken>,
    expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Create a new token.
    ///
    /// An empty `token_type` defaults to `Bearer`. Any casing of `bearer` is
    /// normalized to `Bearer`.
    ///
    /// # Errors
    /// Fails if `access_token` is empty.
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::InvalidConfig(
                "access token must not be empty".to_string(),
            ));
        }

        let token_type = token_type.into();
        let token_type = if token_type.is_empty() || token_type.eq_ignore_ascii_case("bearer") {
            DEFAULT_TOKEN_TYPE.to_string()
        } else {
            token_type
        };

        Ok(Self {
            access_token: AccessToken::new(access_token),
            token_type,
            refresh_token: refresh_token
                .filter(|t| !t.is_empty())
                .map(RefreshToken::new),
            expires_at,
        })
    }

    /// Create a `Bearer` token that never expires.
    ///
    /// # Errors
    /// Fails if `access_token` is empty.
    pub fn bearer(access_token: impl Into<String>) -> Result<Self> {
        Self::new(access_token, DEFAULT_TOKEN_TYPE, None, None)
    }

    #[must_use]
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the token has expired by now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token has expired at `now`. Tokens without expiry never do.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Returns `true` if both tokens carry the same access token.
    #[must_use]
    pub fn same_access_token(&self, other: &Token) -> bool {
        self.access_token.secret() == other.access_token.secret()
    }

    /// Keep `previous`'s refresh token if this token was issued without one.
    pub(crate) fn inherit_refresh_token(mut self, previous: &Token) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token.clone_from(&previous.refresh_token);
        }
        self
    }

    /// The value of the `Authorization` header: `<token_type> <access_token>`.
    ///
    /// # Errors
    /// Fails with `InvalidHeaderValue` if the token is not ASCII.
    pub fn authorization_header(&self) -> Result<HeaderValue> {
        let value = format!("{} {}", self.token_type, self.access_token.secret());
        crate::require_ascii(&value)?;
        let mut header = HeaderValue::from_str(&value).map_err(|_e| Error::InvalidHeaderValue)?;
        header.set_sensitive(true);
        Ok(header)
    }
}
