//! Outbound Home Graph HTTP client.
//!
//! Spec.md §1 carves the *low-level construction* of these request bodies
//! out of the core's scope ("the core emits structured payloads; a thin
//! adapter transmits them") — this module is that thin adapter: it
//! implements [`HomeGraphClient`] concretely so the bridge is runnable, but
//! every call still goes through the same structured, typed port the
//! fulfillment router calls against in tests.
//!
//! Grounded on `nexus-federation::client::FederationClient`: a `reqwest`
//! client built once with a fixed timeout and user agent, one method per
//! remote operation, errors mapped through a small `From<reqwest::Error>`
//! wrapper (here, `anyhow::Error` via `?`, matching the port's
//! `anyhow::Result` signature rather than introducing a second error enum).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use homed_common::ports::HomeGraphClient;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

const HOMEGRAPH_API_BASE: &str = "https://homegraph.googleapis.com/v1";

/// Resolves the bearer token used to authenticate outbound Home Graph
/// calls. Acquiring and refreshing this token from the opaque credentials
/// handle is itself an OAuth2
/// client-credentials exchange against Google — explicitly the kind of
/// "OAuth-style authentication" spec.md §1 keeps outside the core; a real
/// deployment implements this against its service-account JSON.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

/// Concrete [`HomeGraphClient`] that speaks the real `homegraph.googleapis.com`
/// REST surface.
pub struct GoogleHomeGraphClient {
    http: Client,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GoogleHomeGraphClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("homed-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build reqwest client");
        Self { http, tokens }
    }
}

#[async_trait]
impl HomeGraphClient for GoogleHomeGraphClient {
    async fn request_sync(&self, agent_user_id: &str) -> anyhow::Result<()> {
        let token = self.tokens.access_token().await?;
        let body = json!({ "agentUserId": agent_user_id });
        debug!(agent_user_id, "requesting Home Graph SYNC");
        self.http
            .post(format!("{HOMEGRAPH_API_BASE}/devices:requestSync"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn report_state_and_notification(
        &self,
        request_id: &str,
        agent_user_id: &str,
        states: HashMap<String, Value>,
    ) -> anyhow::Result<()> {
        let token = self.tokens.access_token().await?;
        let body = json!({
            "requestId": request_id,
            "agentUserId": agent_user_id,
            "payload": { "devices": { "states": states } },
        });
        debug!(agent_user_id, request_id, "reporting Home Graph state");
        self.http
            .post(format!("{HOMEGRAPH_API_BASE}/devices:reportStateAndNotification"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
