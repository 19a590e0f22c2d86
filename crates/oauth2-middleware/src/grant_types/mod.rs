//! Grant types that exchange credentials for a [`Token`] at a token endpoint.
mod client_credentials;
#[cfg(feature = "jwt-bearer")]
mod jwt_bearer;
mod password;
mod refresh_token;

use std::sync::Arc;

use base64::Engine;
use chrono::{TimeDelta, Utc};
use http::HeaderValue;
use oauth2::{AuthType, ClientId, ClientSecret, TokenUrl};
use serde::Deserialize;

pub use client_credentials::*;
#[cfg(feature = "jwt-bearer")]
pub use jwt_bearer::*;
pub use password::*;
pub use refresh_token::*;

use crate::{
    error::{Error, Result},
    Token,
};

/// A strategy to obtain a token from a token endpoint.
///
/// Implemented by every built-in grant. Implement it for custom grants and wrap
/// them in [`GrantType::Custom`].
pub trait Grant: std::fmt::Debug + Send + Sync {
    /// The `grant_type` parameter sent to the token endpoint.
    fn name(&self) -> &str;

    fn token_url(&self) -> &TokenUrl;

    /// Client credentials to send as HTTP Basic authentication, if any.
    fn client_auth(&self) -> Option<&ClientAuth> {
        None
    }

    /// Build the form parameters of the token request.
    ///
    /// `overrides` are merged into the parameters: existing keys are replaced,
    /// new keys are appended. `grant_type` is never overridden.
    ///
    /// # Errors
    /// Fails if the body cannot be built, for example if an assertion cannot be signed.
    fn build_token_request_body(&self, overrides: &[(String, String)]) -> Result<FormParams>;

    /// Parse the body of a successful token endpoint response.
    ///
    /// # Errors
    /// Fails with [`Error::TokenEndpoint`] if the body is not a valid token response.
    fn parse_token_response(&self, status: u16, body: &[u8]) -> Result<Token> {
        parse_token_response(status, body)
    }
}

/// The grant types supported by [`Oauth2Client`](crate::Oauth2Client).
#[derive(Debug, Clone)]
pub enum GrantType {
    ClientCredentials(ClientCredentialsGrant),
    Password(PasswordGrant),
    RefreshToken(RefreshTokenGrant),
    #[cfg(feature = "jwt-bearer")]
    JwtBearer(JwtBearerGrant),
    /// Extension point for grants not provided by this crate.
    Custom(Arc<dyn Grant>),
}

impl GrantType {
    /// Wrap a custom grant.
    pub fn custom(grant: impl Grant + 'static) -> Self {
        Self::Custom(Arc::new(grant))
    }

    fn inner(&self) -> &dyn Grant {
        match self {
            Self::ClientCredentials(grant) => grant as &dyn Grant,
            Self::Password(grant) => grant as &dyn Grant,
            Self::RefreshToken(grant) => grant as &dyn Grant,
            #[cfg(feature = "jwt-bearer")]
            Self::JwtBearer(grant) => grant as &dyn Grant,
            Self::Custom(grant) => grant.as_ref(),
        }
    }
}

impl Grant for GrantType {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn token_url(&self) -> &TokenUrl {
        self.inner().token_url()
    }

    fn client_auth(&self) -> Option<&ClientAuth> {
        self.inner().client_auth()
    }

    fn build_token_request_body(&self, overrides: &[(String, String)]) -> Result<FormParams> {
        self.inner().build_token_request_body(overrides)
    }

    fn parse_token_response(&self, status: u16, body: &[u8]) -> Result<Token> {
        self.inner().parse_token_response(status, body)
    }
}

impl From<ClientCredentialsGrant> for GrantType {
    fn from(grant: ClientCredentialsGrant) -> Self {
        Self::ClientCredentials(grant)
    }
}

impl From<PasswordGrant> for GrantType {
    fn from(grant: PasswordGrant) -> Self {
        Self::Password(grant)
    }
}

impl From<RefreshTokenGrant> for GrantType {
    fn from(grant: RefreshTokenGrant) -> Self {
        Self::RefreshToken(grant)
    }
}

#[cfg(feature = "jwt-bearer")]
impl From<JwtBearerGrant> for GrantType {
    fn from(grant: JwtBearerGrant) -> Self {
        Self::JwtBearer(grant)
    }
}

/// Ordered form parameters of a token request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FormParams(Vec<(String, String)>);

impl FormParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, keeping the position of an existing key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Merge caller supplied parameters. `grant_type` is protected.
    pub fn merge(&mut self, overrides: &[(String, String)]) -> &mut Self {
        for (key, value) in overrides {
            if key == "grant_type" {
                tracing::debug!("Ignoring override of `grant_type` in token request.");
                continue;
            }
            self.set(key.as_str(), value.as_str());
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `application/x-www-form-urlencoded` representation.
    #[must_use]
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

// Values may hold passwords or assertions.
impl std::fmt::Debug for FormParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(k, _)| k))
            .finish()
    }
}

/// Credentials a confidential client authenticates with at the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_type: AuthType,
}

impl ClientAuth {
    #[must_use]
    pub fn new(client_id: ClientId, client_secret: ClientSecret, auth_type: AuthType) -> Self {
        Self {
            client_id,
            client_secret,
            auth_type,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The `Authorization` header for HTTP Basic authentication, `None` if the
    /// credentials are sent in the request body instead.
    ///
    /// Id and secret are form-urlencoded before being joined, see RFC 6749 section 2.3.1.
    ///
    /// # Errors
    /// Fails if the encoded credentials are not a valid header value.
    pub fn basic_auth_header(&self) -> Result<Option<HeaderValue>> {
        if !matches!(self.auth_type, AuthType::BasicAuth) {
            return Ok(None);
        }
        let id: String = url::form_urlencoded::byte_serialize(self.client_id.as_bytes()).collect();
        let secret: String =
            url::form_urlencoded::byte_serialize(self.client_secret.secret().as_bytes()).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|_e| Error::InvalidHeaderValue)?;
        header.set_sensitive(true);
        Ok(Some(header))
    }

    /// Append `client_id` and `client_secret` to `params` when configured to
    /// authenticate via the request body.
    pub fn append_to_body(&self, params: &mut FormParams) {
        if matches!(self.auth_type, AuthType::RequestBody) {
            params.set("client_id", self.client_id.as_str());
            params.set("client_secret", self.client_secret.secret());
        }
    }
}

/// Fail with every required key whose value is absent or empty, in the given order.
pub(crate) fn require_keys(fields: &[(&'static str, Option<&str>)]) -> Result<()> {
    let keys: Vec<&'static str> = fields
        .iter()
        .filter(|(_, value)| value.map_or(true, str::is_empty))
        .map(|(key, _)| *key)
        .collect();

    if keys.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingConfig { keys })
    }
}

pub(crate) fn parse_token_url(token_url: String) -> Result<TokenUrl> {
    TokenUrl::new(token_url.clone())
        .map_err(|e| Error::InvalidConfig(format!("`token_url` `{token_url}` is invalid: {e}")))
}

pub(crate) fn parse_auth_type(auth_type: Option<&str>) -> Result<AuthType> {
    match auth_type {
        None | Some("basic" | "basic_auth") => Ok(AuthType::BasicAuth),
        Some("request_body") => Ok(AuthType::RequestBody),
        Some(other) => Err(Error::InvalidConfig(format!(
            "`auth_type` must be `basic` or `request_body`, got `{other}`"
        ))),
    }
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<ExpiresIn>,
    refresh_token: Option<String>,
}

// Some providers send `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            Self::Seconds(seconds) => i64::try_from(*seconds).ok(),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Parse a JSON token endpoint response into a [`Token`].
///
/// `expires_in` is converted into an absolute expiry.
///
/// # Errors
/// Fails with [`Error::TokenEndpoint`] if the body is not JSON, lacks a
/// non-empty `access_token` or has an invalid `expires_in`. An `expires_in` of
/// zero or less is invalid: such a token is expired on arrival.
pub fn parse_token_response(status: u16, body: &[u8]) -> Result<Token> {
    let malformed = || Error::TokenEndpoint {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    };

    let response: TokenEndpointResponse = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Failed to parse token response: {e}");
        malformed()
    })?;

    let expires_at = match response.expires_in {
        Some(expires_in) => Some(
            expires_in
                .seconds()
                .filter(|seconds| *seconds > 0)
                .and_then(TimeDelta::try_seconds)
                .and_then(|delta| Utc::now().checked_add_signed(delta))
                .ok_or_else(malformed)?,
        ),
        None => None,
    };

    Token::new(
        response.access_token,
        response.token_type.unwrap_or_default(),
        response.refresh_token,
        expires_at,
    )
    .map_err(|_e| malformed())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_form_params_merge() {
        let mut params = FormParams::new();
        params.set("grant_type", "client_credentials").set("scope", "");
        params.merge(&[
            ("grant_type".to_string(), "password".to_string()),
            ("scope".to_string(), "read write".to_string()),
            ("audience".to_string(), "api".to_string()),
        ]);

        assert_eq!(
            params.encode(),
            "grant_type=client_credentials&scope=read+write&audience=api"
        );
    }

    #[test]
    fn test_form_params_debug_hides_values() {
        let mut params = FormParams::new();
        params.set("password", "hunter2");
        assert_eq!(format!("{params:?}"), "[\"password\"]");
    }

    #[test]
    fn test_require_keys_reports_all_missing() {
        let result = require_keys(&[
            ("client_id", None),
            ("client_secret", Some("secret")),
            ("token_url", Some("")),
        ]);
        match result {
            Err(Error::MissingConfig { keys }) => assert_eq!(keys, vec!["client_id", "token_url"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_basic_auth_header() {
        let auth = ClientAuth::new(
            ClientId::new("my-client".to_string()),
            ClientSecret::new("my-secret".to_string()),
            AuthType::BasicAuth,
        );
        let header = auth.basic_auth_header().unwrap().unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic bXktY2xpZW50Om15LXNlY3JldA==");

        let mut params = FormParams::new();
        auth.append_to_body(&mut params);
        assert!(params.get("client_secret").is_none());
    }

    #[test]
    fn test_request_body_auth() {
        let auth = ClientAuth::new(
            ClientId::new("my-client".to_string()),
            ClientSecret::new("my-secret".to_string()),
            AuthType::RequestBody,
        );
        assert!(auth.basic_auth_header().unwrap().is_none());

        let mut params = FormParams::new();
        auth.append_to_body(&mut params);
        assert_eq!(params.encode(), "client_id=my-client&client_secret=my-secret");
    }

    #[test]
    fn test_parse_token_response() {
        let body = serde_json::json!({
            "access_token": "my-token",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "my-refresh-token",
            "scope": "ignored"
        })
        .to_string();
        let token = parse_token_response(200, body.as_bytes()).unwrap();
        assert_eq!(token.access_token().secret(), "my-token");
        assert_eq!(token.token_type(), "Bearer");
        assert_eq!(token.refresh_token().unwrap().secret(), "my-refresh-token");
        assert!(token.expires_at().unwrap() > Utc::now() + TimeDelta::seconds(3500));
    }

    #[test]
    fn test_parse_token_response_string_expiry() {
        let body = r#"{"access_token": "my-token", "expires_in": "60"}"#;
        let token = parse_token_response(200, body.as_bytes()).unwrap();
        assert!(token.expires_at().is_some());
    }

    #[test]
    fn test_parse_token_response_without_expiry() {
        let body = r#"{"access_token": "my-token"}"#;
        let token = parse_token_response(200, body.as_bytes()).unwrap();
        assert_eq!(token.token_type(), "Bearer");
        assert!(token.expires_at().is_none());
        assert!(token.refresh_token().is_none());
    }

    #[test]
    fn test_parse_token_response_malformed() {
        for body in [
            "not json",
            r#"{"token_type": "Bearer"}"#,
            r#"{"access_token": ""}"#,
            r#"{"access_token": "t", "expires_in": "soon"}"#,
            r#"{"access_token": "t", "expires_in": 0}"#,
            r#"{"access_token": "t", "expires_in": "-30"}"#,
        ] {
            match parse_token_response(200, body.as_bytes()) {
                Err(Error::TokenEndpoint { status, body: raw }) => {
                    assert_eq!(status, 200);
                    assert_eq!(raw, body);
                }
                other => panic!("unexpected result for `{body}`: {other:?}"),
            }
        }
    }
}
