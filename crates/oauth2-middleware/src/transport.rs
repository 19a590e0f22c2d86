use async_trait::async_trait;
use oauth2::AsyncHttpClient;

use crate::error::{Error, Result};

/// Request type used by [`HttpTransport`].
pub type HttpRequest = oauth2::HttpRequest;
/// Response type used by [`HttpTransport`].
pub type HttpResponse = oauth2::HttpResponse;

/// The capability to send an HTTP request and receive its response.
///
/// Used both for token endpoint calls and for the requests wrapped by
/// [`Oauth2Middleware`](crate::Oauth2Middleware). Timeouts, TLS and connection
/// pooling are the transport's responsibility.
#[async_trait]
pub trait HttpTransport: std::fmt::Debug + Send + Sync {
    /// Send `request`.
    ///
    /// # Errors
    /// Network-level failures are reported as [`Error::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        AsyncHttpClient::call(self, request)
            .await
            .map_err(Error::transport)
    }
}

/// Build the default transport for token requests.
/// Redirects are disabled to prevent SSRF via the token endpoint.
pub(crate) fn default_transport() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(Error::transport)
}

/// Copy a request so that it can be sent a second time.
pub(crate) fn clone_request(request: &HttpRequest) -> HttpRequest {
    let mut clone = http::Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}
