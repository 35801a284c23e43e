//! Bearer credential sources.
//!
//! The engine asks for a token before every remote call. A missing token
//! turns listing into an empty result and every other call into
//! [`SyncError::MissingCredential`](crate::error::SyncError::MissingCredential).

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Supplies the bearer token for catalog requests.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` when the user is signed out.
    async fn bearer_token(&self) -> Option<String>;
}

/// In-memory token that the host application can replace at runtime.
#[derive(Debug, Default)]
pub struct StaticCredential {
    token: RwLock<Option<String>>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredential {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// A provider with no token (signed out).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads the token from an environment variable once.
    pub fn from_env(var: &str) -> Self {
        StaticCredential {
            token: RwLock::new(std::env::var(var).ok().filter(|t| !t.trim().is_empty())),
        }
    }

    pub async fn set(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_can_be_replaced() {
        let creds = StaticCredential::empty();
        assert_eq!(creds.bearer_token().await, None);

        creds.set(Some("abc".into())).await;
        assert_eq!(creds.bearer_token().await.as_deref(), Some("abc"));

        assert_eq!(
            StaticCredential::new("xyz").bearer_token().await.as_deref(),
            Some("xyz")
        );
    }
}
