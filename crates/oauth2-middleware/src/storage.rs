use std::sync::RwLock;

use async_trait::async_trait;

use crate::{error::Result, Token};

/// Storage for the current token of an [`Oauth2Client`](crate::Oauth2Client).
///
/// Implement this trait to back the token with a file, a database or a
/// distributed cache. Implementations must offer read-your-writes consistency
/// within a process. Concurrent writers may race, the last one wins.
#[async_trait]
pub trait TokenStorage: std::fmt::Debug + Send + Sync {
    /// Returns the stored token, `None` if there is none.
    async fn get(&self) -> Result<Option<Token>>;

    /// Replaces the stored token.
    async fn set(&self, token: Token) -> Result<()>;

    /// Removes the stored token.
    async fn delete(&self) -> Result<()>;
}

/// Default [`TokenStorage`]: a single in-memory slot.
#[derive(Debug, Default)]
pub struct InMemoryTokenStorage {
    token: RwLock<Option<Token>>,
}

impl InMemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that already holds `token`.
    #[must_use]
    pub fn with_token(token: Token) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn get(&self) -> Result<Option<Token>> {
        // Unwrap RWLock to propagate poison (writer panicked)
        let token = self.token.read().expect("Non-poisoned lock").clone();
        Ok(token)
    }

    async fn set(&self, token: Token) -> Result<()> {
        *self.token.write().expect("Non-poisoned lock") = Some(token);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.token.write().expect("Non-poisoned lock").take();
        Ok(())
    }
}
