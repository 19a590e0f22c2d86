use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};

use crate::{
    error::{Error, Result},
    grant_types::{ClientAuth, Grant, GrantType, RefreshTokenGrant},
    storage::{InMemoryTokenStorage, TokenStorage},
    transport::{default_transport, HttpTransport},
    Token,
};

type Acquisition = Shared<BoxFuture<'static, Result<Token>>>;

/// Obtains tokens through a [`GrantType`] and caches them in a [`TokenStorage`].
///
/// A cached token is reused until it expires. Only one token request is in flight
/// per client at any time: concurrent callers that find no valid token wait for
/// the same request and receive its token or its error.
///
/// Expired tokens that carry a refresh token are renewed with the grant set via
/// [`Oauth2Client::set_refresh_grant`], falling back to the primary grant if that fails.
///
/// Uses `Arc` internally for cheap cloning. Clones share cache and in-flight requests.
#[derive(Clone)]
pub struct Oauth2Client {
    inner: Arc<Inner>,
}

struct Inner {
    grant_type: RwLock<Arc<GrantType>>,
    refresh_grant: RwLock<Option<Arc<RefreshTokenGrant>>>,
    storage: RwLock<Arc<dyn TokenStorage>>,
    transport: Arc<dyn HttpTransport>,
    in_flight: Mutex<Option<(u64, Acquisition)>>,
    next_flight: AtomicU64,
}

impl std::fmt::Debug for Oauth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oauth2Client")
            .field("grant_type", &self.inner.grant_type())
            .field("refresh_grant", &self.inner.refresh_grant())
            .field("storage", &self.inner.storage())
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

impl Oauth2Client {
    /// Create a client for `grant_type` with in-memory token storage.
    ///
    /// Token requests are sent with a `reqwest::Client` that does not follow redirects.
    ///
    /// # Errors
    /// Fails if the `reqwest::Client` cannot be built, for example because no TLS
    /// backend can be initialized.
    pub fn new(grant_type: impl Into<GrantType>) -> Result<Self> {
        Ok(Self::with_transport(grant_type, Arc::new(default_transport()?)))
    }

    /// Create a client that sends token requests through `transport`.
    pub fn with_transport(
        grant_type: impl Into<GrantType>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                grant_type: RwLock::new(Arc::new(grant_type.into())),
                refresh_grant: RwLock::new(None),
                storage: RwLock::new(Arc::new(InMemoryTokenStorage::new())),
                transport,
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Use `storage` instead of the in-memory default.
    #[must_use]
    pub fn with_token_storage(self, storage: Arc<dyn TokenStorage>) -> Self {
        self.set_token_storage(storage);
        self
    }

    /// Replace the grant used for new tokens. A cached token stays valid.
    pub fn set_grant_type(&self, grant_type: impl Into<GrantType>) {
        *self.inner.grant_type.write().expect("Non-poisoned lock") = Arc::new(grant_type.into());
    }

    /// Replace the token storage.
    pub fn set_token_storage(&self, storage: Arc<dyn TokenStorage>) {
        *self.inner.storage.write().expect("Non-poisoned lock") = storage;
    }

    /// Set the grant used to renew expired tokens that carry a refresh token.
    pub fn set_refresh_grant(&self, refresh_grant: Option<RefreshTokenGrant>) {
        *self.inner.refresh_grant.write().expect("Non-poisoned lock") = refresh_grant.map(Arc::new);
    }

    #[must_use]
    pub fn grant_type(&self) -> Arc<GrantType> {
        self.inner.grant_type()
    }

    #[must_use]
    pub fn token_storage(&self) -> Arc<dyn TokenStorage> {
        self.inner.storage()
    }

    /// Returns a valid token, from the cache if possible.
    ///
    /// # Errors
    /// - [`Error::TokenEndpoint`] if the token endpoint rejects the request or returns an invalid body.
    /// - [`Error::Transport`] if the token endpoint cannot be reached.
    /// - [`Error::Signing`] if a JWT bearer assertion cannot be signed.
    /// - [`Error::Storage`] if the token storage fails.
    pub async fn get_access_token(&self) -> Result<Token> {
        self.access_token(Vec::new()).await
    }

    /// Like [`get_access_token`](Self::get_access_token), merging `params` into the
    /// token request if a new token has to be fetched.
    ///
    /// Callers joining a token request already in flight receive its token,
    /// regardless of their own `params`.
    ///
    /// # Errors
    /// See [`get_access_token`](Self::get_access_token).
    pub async fn get_access_token_with_params<I, K, V>(&self, params: I) -> Result<Token>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let overrides = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.access_token(overrides).await
    }

    /// Remove `token` from the cache so that the next call fetches a new one.
    ///
    /// Does nothing if the cache already holds a different token, so that
    /// concurrent rejections of the same token cause a single renewal.
    ///
    /// # Errors
    /// Fails with [`Error::Storage`] if the token storage fails.
    pub async fn invalidate(&self, token: &Token) -> Result<()> {
        let storage = self.inner.storage();
        if let Some(current) = storage.get().await? {
            if current.same_access_token(token) {
                tracing::debug!("Invalidating cached token.");
                storage.delete().await?;
            }
        }
        Ok(())
    }

    async fn access_token(&self, overrides: Vec<(String, String)>) -> Result<Token> {
        if let Some(token) = self.inner.cached_token().await? {
            tracing::trace!("Using cached token.");
            return Ok(token);
        }
        self.inner.clone().join_acquisition(overrides).await
    }
}

impl Inner {
    fn grant_type(&self) -> Arc<GrantType> {
        self.grant_type.read().expect("Non-poisoned lock").clone()
    }

    fn refresh_grant(&self) -> Option<Arc<RefreshTokenGrant>> {
        self.refresh_grant.read().expect("Non-poisoned lock").clone()
    }

    fn storage(&self) -> Arc<dyn TokenStorage> {
        self.storage.read().expect("Non-poisoned lock").clone()
    }

    async fn cached_token(&self) -> Result<Option<Token>> {
        let token = self.storage().get().await?;
        Ok(token.filter(|token| !token.is_expired()))
    }

    /// Wait for the acquisition in flight, starting one if there is none.
    async fn join_acquisition(self: Arc<Self>, overrides: Vec<(String, String)>) -> Result<Token> {
        let acquisition = {
            let mut in_flight = self.in_flight.lock().expect("Non-poisoned lock");
            if let Some((_, acquisition)) = in_flight.as_ref() {
                tracing::trace!("Joining token request in flight.");
                acquisition.clone()
            } else {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let inner = self.clone();
                let acquisition = async move {
                    // Clear the slot even if a transport or storage panics.
                    let result = AssertUnwindSafe(inner.acquire(overrides))
                        .catch_unwind()
                        .await;
                    inner.finish_acquisition(id);
                    result.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                }
                .boxed()
                .shared();
                *in_flight = Some((id, acquisition.clone()));
                acquisition
            }
        };
        acquisition.await
    }

    fn finish_acquisition(&self, id: u64) {
        let mut in_flight = self.in_flight.lock().expect("Non-poisoned lock");
        if in_flight.as_ref().is_some_and(|(current, _)| *current == id) {
            *in_flight = None;
        }
    }

    #[tracing::instrument(skip_all)]
    async fn acquire(&self, overrides: Vec<(String, String)>) -> Result<Token> {
        let storage = self.storage();
        let cached = storage.get().await?;

        // A previous acquisition may have finished since the caller checked.
        if let Some(token) = cached.as_ref().filter(|token| !token.is_expired()) {
            return Ok(token.clone());
        }

        let refreshed = match (
            cached.as_ref().and_then(Token::refresh_token),
            self.refresh_grant(),
        ) {
            (Some(refresh_token), Some(refresh_grant)) => {
                let mut params = overrides.clone();
                params.push((
                    "refresh_token".to_string(),
                    refresh_token.secret().to_string(),
                ));
                match self.request_token(refresh_grant.as_ref(), &params).await {
                    Ok(token) => cached
                        .as_ref()
                        .map(|previous| token.inherit_refresh_token(previous)),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to renew token with refresh token, falling back to `{}` grant: {e}",
                            self.grant_type().name()
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let token = match refreshed {
            Some(token) => token,
            None => {
                let grant = self.grant_type();
                self.request_token(grant.as_ref(), &overrides).await?
            }
        };

        storage.set(token.clone()).await?;
        Ok(token)
    }

    #[tracing::instrument(
        skip_all,
        fields(grant_type = grant.name(), token_url = grant.token_url().as_str())
    )]
    async fn request_token(
        &self,
        grant: &dyn Grant,
        overrides: &[(String, String)],
    ) -> Result<Token> {
        let body = grant.build_token_request_body(overrides)?;

        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri(grant.token_url().as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json");
        if let Some(header) = grant
            .client_auth()
            .map(ClientAuth::basic_auth_header)
            .transpose()?
            .flatten()
        {
            request = request.header(AUTHORIZATION, header);
        }
        let request = request
            .body(body.encode().into_bytes())
            .map_err(|e| Error::InvalidConfig(format!("Failed to build token request: {e}")))?;

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!("Failed to fetch token: {e}");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = String::from_utf8_lossy(response.body()).into_owned();
            tracing::error!("Token endpoint returned status {status}: {body}");
            return Err(Error::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token = grant.parse_token_response(status.as_u16(), response.body())?;
        if token.is_expired() {
            tracing::error!("Token endpoint issued a token that is already expired.");
            return Err(Error::TokenEndpoint {
                status: status.as_u16(),
                body: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        tracing::debug!(
            "Successfully fetched token with grant `{}`. Expires at: {:?}",
            grant.name(),
            token.expires_at()
        );
        Ok(token)
    }
}
