//! The Google Smart Home fulfillment HTTP endpoint.
//!
//! Grounded on `nexus-api`'s `AppState`/`build_router` shape
//! (`nexus-api/src/lib.rs`) and its `State`/`Json` extractor routes
//! (`nexus-api/src/routes/messages.rs`), with the auth middleware there
//! replaced by a direct bearer-token lookup: validating a Google OAuth
//! access token is explicitly out of this core's scope, but
//! resolving the opaque bearer token to a [`User`] is the same
//! `UserRepository::find_by_token` port the gateway's token flow already
//! defines, so the fulfillment edge reuses it rather than inventing a
//! second lookup.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use homed_common::ports::UserRepository;
use homed_common::HomedError;
use serde_json::Value;

use crate::router::FulfillmentRouter;

/// Shared state for the fulfillment HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<FulfillmentRouter>,
    pub users: Arc<dyn UserRepository>,
}

/// Build the fulfillment router: a single `POST /fulfillment` endpoint that
/// accepts Google's intent envelope and returns its response envelope.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/fulfillment", post(fulfillment_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn fulfillment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, HomedError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| HomedError::InvalidFulfillmentRequest("missing bearer token".to_string()))?;

    let user = state
        .users
        .find_by_token(token)
        .await
        .map_err(HomedError::Internal)?
        .ok_or_else(|| HomedError::InvalidFulfillmentRequest("unknown or expired token".to_string()))?;

    let response = state.router.handle_fulfillment(&user, body).await?;
    Ok(Json(serde_json::json!({ "requestId": response.request_id, "payload": response.payload })))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homed_common::ports::{HomeGraphClient, User};
    use homed_devices::DeviceRepository;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FakeUsers;

    #[async_trait]
    impl UserRepository for FakeUsers {
        async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<User>> {
            Ok((token == "good-token").then(|| User { id: "u-1".to_string() }))
        }
        async fn delete_user(&self, _user_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopHomeGraph;

    #[async_trait]
    impl HomeGraphClient for NoopHomeGraph {
        async fn request_sync(&self, _agent_user_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn report_state_and_notification(
            &self,
            _request_id: &str,
            _agent_user_id: &str,
            _states: HashMap<String, Value>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_app() -> Router {
        let router = crate::router::FulfillmentRouter::new(
            Arc::new(DeviceRepository::new()),
            Arc::new(NoopHomeGraph),
            Arc::new(FakeUsers),
            Duration::from_millis(300),
        );
        build_router(AppState { router, users: Arc::new(FakeUsers) })
    }

    #[tokio::test]
    async fn missing_bearer_token_is_rejected() {
        let response = test_app()
            .oneshot(
                axum::http::Request::post("/fulfillment")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"requestId":"r-1","inputs":[{"intent":"action.devices.SYNC"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_bearer_token_reaches_the_router() {
        let response = test_app()
            .oneshot(
                axum::http::Request::post("/fulfillment")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer good-token")
                    .body(axum::body::Body::from(r#"{"requestId":"r-1","inputs":[{"intent":"action.devices.SYNC"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
