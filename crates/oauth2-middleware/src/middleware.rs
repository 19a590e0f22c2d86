use std::sync::Arc;

use http::{
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
    Method,
};
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    transport::{clone_request, HttpRequest, HttpResponse, HttpTransport},
    Oauth2Client, Token,
};

/// Decides which responses count as a rejected token.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    /// Response statuses that trigger a token refresh and a single retry.
    #[builder(default = vec![401], setter(into))]
    statuses: Vec<u16>,
    /// Also treat responses carrying an `invalid_token` error as rejected, either in
    /// the `WWW-Authenticate` header or as the `error` field of a JSON body.
    #[builder(default)]
    match_invalid_token: bool,
    /// Return [`Error::AuthExhausted`] instead of the response if the retried request
    /// is rejected as well.
    #[builder(default)]
    error_on_exhausted: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn statuses(&self) -> &[u16] {
        &self.statuses
    }

    #[must_use]
    pub fn error_on_exhausted(&self) -> bool {
        self.error_on_exhausted
    }

    /// Whether `response` rejects the token it was sent with.
    #[must_use]
    pub fn is_auth_failure(&self, response: &HttpResponse) -> bool {
        if self.statuses.contains(&response.status().as_u16()) {
            return true;
        }
        self.match_invalid_token && has_invalid_token_error(response)
    }
}

fn has_invalid_token_error(response: &HttpResponse) -> bool {
    let in_header = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| {
            value.contains(r#"error="invalid_token""#) || value.contains("error=invalid_token")
        });
    if in_header {
        return true;
    }

    serde_json::from_slice::<serde_json::Value>(response.body())
        .ok()
        .and_then(|body| body.get("error").cloned())
        .is_some_and(|error| error == "invalid_token")
}

#[derive(Debug)]
enum AuthState {
    NotAuthenticated,
    Authenticated(Token),
    Retrying,
    Failed(HttpResponse),
}

/// Sends requests with an `Authorization` header obtained from an [`Oauth2Client`].
///
/// If the server rejects the token (see [`RetryPolicy`]), the token is invalidated,
/// a new one is fetched and the request is sent once more. The response to the
/// second attempt is returned as is.
///
/// Requests that already carry an `Authorization` header are sent unchanged.
#[derive(Debug, Clone)]
pub struct Oauth2Middleware {
    client: Oauth2Client,
    transport: Arc<dyn HttpTransport>,
    retry_policy: RetryPolicy,
}

impl Oauth2Middleware {
    /// Create a middleware that sends requests with a default `reqwest::Client`.
    ///
    /// Unlike the token requests of `client`, these requests follow redirects.
    #[must_use]
    pub fn new(client: Oauth2Client) -> Self {
        Self {
            transport: Arc::new(reqwest::Client::new()),
            client,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Send requests through `transport` instead.
    #[must_use]
    pub fn set_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn set_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn client(&self) -> &Oauth2Client {
        &self.client
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Send `request`, adding the `Authorization` header if it is not already set.
    ///
    /// # Errors
    /// - Fails if no token can be obtained. The request is not sent in this case.
    /// - Fails with [`Error::Transport`] if the request cannot be sent.
    /// - Fails with [`Error::AuthExhausted`] if the retried request is rejected
    ///   and [`RetryPolicy`] asks for an error.
    #[tracing::instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if request.headers().contains_key(AUTHORIZATION) {
            tracing::trace!("Request is already authorized, sending unchanged.");
            return self.transport.send(request).await;
        }

        let mut state = AuthState::NotAuthenticated;
        loop {
            state = match state {
                AuthState::NotAuthenticated => {
                    AuthState::Authenticated(self.client.get_access_token().await?)
                }
                AuthState::Authenticated(token) => {
                    let response = self.send_authorized(&request, &token).await?;
                    if !self.retry_policy.is_auth_failure(&response) {
                        return Ok(response);
                    }
                    tracing::debug!(
                        "Token rejected with status {}, fetching a new one.",
                        response.status()
                    );
                    self.client.invalidate(&token).await?;
                    AuthState::Retrying
                }
                AuthState::Retrying => {
                    let token = self.client.get_access_token().await?;
                    let response = self.send_authorized(&request, &token).await?;
                    if !self.retry_policy.is_auth_failure(&response) {
                        return Ok(response);
                    }
                    AuthState::Failed(response)
                }
                AuthState::Failed(response) => {
                    let status = response.status().as_u16();
                    tracing::warn!("Token rejected again with status {status} after refresh.");
                    if self.retry_policy.error_on_exhausted {
                        return Err(Error::AuthExhausted { status });
                    }
                    return Ok(response);
                }
            };
        }
    }

    async fn send_authorized(&self, request: &HttpRequest, token: &Token) -> Result<HttpResponse> {
        let mut request = clone_request(request);
        request
            .headers_mut()
            .insert(AUTHORIZATION, token.authorization_header()?);
        self.transport.send(request).await
    }

    /// Build a request to `uri` and [`execute`](Self::execute) it.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidConfig`] if `uri` is invalid.
    /// See [`execute`](Self::execute) for all other errors.
    pub async fn request(&self, method: Method, uri: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .map_err(|e| Error::InvalidConfig(format!("Invalid request to `{uri}`: {e}")))?;
        self.execute(request).await
    }

    /// Convenience method to make a `GET` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get(&self, uri: &str) -> Result<HttpResponse> {
        self.request(Method::GET, uri, Vec::new()).await
    }

    /// Convenience method to make a `POST` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post(&self, uri: &str, body: impl Into<Vec<u8>>) -> Result<HttpResponse> {
        self.request(Method::POST, uri, body.into()).await
    }

    /// Convenience method to make a `PUT` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put(&self, uri: &str, body: impl Into<Vec<u8>>) -> Result<HttpResponse> {
        self.request(Method::PUT, uri, body.into()).await
    }

    /// Convenience method to make a `PATCH` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn patch(&self, uri: &str, body: impl Into<Vec<u8>>) -> Result<HttpResponse> {
        self.request(Method::PATCH, uri, body.into()).await
    }

    /// Convenience method to make a `DELETE` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete(&self, uri: &str) -> Result<HttpResponse> {
        self.request(Method::DELETE, uri, Vec::new()).await
    }

    /// Convenience method to make a `HEAD` request to a URI.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn head(&self, uri: &str) -> Result<HttpResponse> {
        self.request(Method::HEAD, uri, Vec::new()).await
    }
}
