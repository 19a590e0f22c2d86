use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors of this crate.
///
/// Cloneable so that a single token acquisition can hand its outcome to every
/// caller waiting on it.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// A grant type was constructed without some of its required keys.
    #[error("Config is missing the following keys: {}", .keys.join(", "))]
    MissingConfig { keys: Vec<&'static str> },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// The private key of a JWT bearer grant could not be loaded or used.
    #[error("Failed to sign assertion: {0}")]
    Signing(String),
    /// The token endpoint answered with a non-2xx status or an unusable body.
    #[error("Token endpoint returned status {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    /// Authentication still failed after the token was renewed.
    #[error("Authentication failed with status {status} after renewing the token")]
    AuthExhausted { status: u16 },
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Request failed: {0}")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync>),
    #[error("Token storage failed: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn transport(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(error))
    }
}
