//! Minimal reference adapters for the external collaborator ports spec.md
//! §1 keeps "deliberately OUT of scope": user/token persistence, gateway
//! token authorization, and the Home Graph OAuth2 access token exchange.
//!
//! A real deployment backs [`homed_common::ports::UserRepository`] and
//! [`homed_common::ports::AuthorizationService`] with actual account
//! storage, and [`homed_fulfillment::homegraph::AccessTokenSource`] with a
//! Google service-account client-credentials flow. These in-memory
//! stand-ins exist so `homed-bridge` is runnable end to end out of the box,
//! seeded from `bootstrap.tokens`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use homed_common::ports::{AuthorizationService, User, UserRepository};
use homed_fulfillment::homegraph::AccessTokenSource;

/// Maps opaque bearer tokens (used both for gateway auth and the
/// fulfillment HTTP edge) to a resolved [`User`].
pub struct InMemoryUserRepository {
    tokens: RwLock<HashMap<String, String>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self { tokens: RwLock::new(HashMap::new()) }
    }

    /// Parse `"token:userId"` entries from config and seed them.
    pub fn seed_from_config(entries: &[String]) -> Self {
        let repo = Self::new();
        for entry in entries {
            if let Some((token, user_id)) = entry.split_once(':') {
                repo.register(token, user_id);
            } else {
                tracing::warn!(entry, "ignoring malformed bootstrap token (expected \"token:userId\")");
            }
        }
        repo
    }

    pub fn register(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.tokens.write().unwrap().insert(token.into(), user_id.into());
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.tokens.read().unwrap().get(token).map(|id| User { id: id.clone() }))
    }

    async fn delete_user(&self, user_id: &str) -> anyhow::Result<()> {
        self.tokens.write().unwrap().retain(|_, v| v != user_id);
        Ok(())
    }
}

/// Gateway `{uniqueId, token}` authorization
/// reuses the same token table — a gateway's token resolves to a user
/// exactly the way a fulfillment bearer token does.
#[async_trait]
impl AuthorizationService for InMemoryUserRepository {
    async fn authorize(&self, _unique_id: &str, token: &str) -> anyhow::Result<Option<User>> {
        self.find_by_token(token).await
    }
}

/// Hands back a fixed bearer token for outbound Home Graph calls instead of
/// performing a real OAuth2 client-credentials exchange.
pub struct StaticAccessTokenSource {
    token: String,
}

impl StaticAccessTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AccessTokenSource for StaticAccessTokenSource {
    async fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}
