//! Ports for external collaborators.
//!
//! The core never authenticates Google-edge users, never persists user/client
//! tokens, and never builds the raw outbound Home Graph HTTP bodies itself.
//! Those concerns live behind these three traits; a thin adapter crate
//! (outside this workspace) implements them against whatever concrete
//! storage/HTTP stack the deployment actually uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The Google "agentUserId" — one user may own many gateway connections.
pub type UserId = String;

/// A resolved user, handed back by [`AuthorizationService`] once a gateway's
/// auth token has been validated against external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
}

/// Persistent storage of users and the client tokens bound to them.
///
/// The core only ever reads through this trait; it never owns a database
/// connection itself.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    async fn delete_user(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Validates a gateway's `{uniqueId, token}` auth message against external
/// user/token storage and resolves it to a [`User`].
///
/// The gateway connection state machine calls into this port with the raw
/// token while awaiting authorization and awaits a decision; it does not
/// decide authentication policy itself.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn authorize(&self, unique_id: &str, token: &str) -> anyhow::Result<Option<User>>;
}

/// Outbound calls to Google's Home Graph cloud.
///
/// The core emits structured payloads; this port is responsible for actually
/// transmitting them (auth headers, retries at the transport's discretion,
/// request signing). Both operations are fire-and-forget from the caller's
/// perspective — failures are reported via `Err` and logged by the caller,
/// never surfaced to the Google fulfillment request that triggered them.
#[async_trait]
pub trait HomeGraphClient: Send + Sync {
    async fn request_sync(&self, agent_user_id: &str) -> anyhow::Result<()>;

    async fn report_state_and_notification(
        &self,
        request_id: &str,
        agent_user_id: &str,
        states: HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<()>;
}
