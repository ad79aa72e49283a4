//! The fulfillment router: dispatches SYNC/QUERY/EXECUTE/
//! DISCONNECT intents against the device repository and capability mapper,
//! and drives the two reactive proactive-push paths — debounced
//! `REQUEST_SYNC` on `devicesUpdated`, batched state reporting on
//! `deviceStateChanged`.
//!
//! The request-handling half has no direct teacher analogue (the teacher
//! has no capability-projection layer); it's built from spec.md §4.G/§6.
//! The reactive half subscribes to the same `tokio::sync::broadcast`
//! channels `homed_devices::DeviceRepository` exposes, in the same
//! subscribe-and-loop shape `nexus-voice`'s room broadcast consumers use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use homed_common::ports::{HomeGraphClient, User, UserRepository};
use homed_common::HomedError;
use homed_devices::capability;
use homed_devices::model::{ExecutionGroup, ExecutionRequest, GoogleDeviceRef, HomedDevice};
use homed_devices::repository::DeviceStateChanged;
use homed_devices::DeviceRepository;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use crate::debounce::SyncDebouncer;
use crate::intent::{
    ExecuteCommandResult, ExecuteStatus, FulfillmentRequest, FulfillmentResponse, Intent, SyncPayload,
};

pub struct FulfillmentRouter {
    devices: Arc<DeviceRepository>,
    home_graph: Arc<dyn HomeGraphClient>,
    users: Arc<dyn UserRepository>,
    debouncer: Arc<SyncDebouncer>,
}

impl FulfillmentRouter {
    /// Build the router and spawn its two reactive loops. `sync_debounce`
    /// is the trailing debounce window for proactive `REQUEST_SYNC`.
    pub fn new(
        devices: Arc<DeviceRepository>,
        home_graph: Arc<dyn HomeGraphClient>,
        users: Arc<dyn UserRepository>,
        sync_debounce: Duration,
    ) -> Arc<Self> {
        let router =
            Arc::new(Self { devices, home_graph, users, debouncer: SyncDebouncer::new(sync_debounce) });
        router.clone().spawn_reactive();
        router
    }

    fn spawn_reactive(self: Arc<Self>) {
        let devices_updated_router = self.clone();
        let mut devices_updated_rx = self.devices.subscribe_devices_updated();
        tokio::spawn(async move {
            loop {
                match devices_updated_rx.recv().await {
                    Ok(event) => devices_updated_router.on_devices_updated(event.user_id),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "devicesUpdated subscriber lagged, some updates were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let state_changed_router = self.clone();
        let mut state_changed_rx = self.devices.subscribe_state_changed();
        tokio::spawn(async move {
            loop {
                match state_changed_rx.recv().await {
                    Ok(event) => state_changed_router.on_state_changed(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "deviceStateChanged subscriber lagged, some updates were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// On `devicesUpdated(userId)`, debounce-trigger a proactive
    /// `requestSync`. Fire-and-forget: failures are
    /// logged, never surfaced to whatever triggered the update.
    fn on_devices_updated(self: &Arc<Self>, user_id: String) {
        let router = self.clone();
        self.debouncer.trigger(user_id.clone(), async move {
            if let Err(error) = router.home_graph.request_sync(&user_id).await {
                let error = HomedError::HomeGraph(error.to_string());
                error!(user_id, %error, "home graph requestSync failed");
            }
        });
    }

    /// On `deviceStateChanged`, diff the device's projected Google state and
    /// push only what changed.
    /// A no-op if nothing Google-visible actually changed.
    async fn on_state_changed(&self, event: DeviceStateChanged) {
        let Some(updates) = capability::get_state_updates(
            &event.device,
            &event.client_id,
            &event.prev_state,
            &event.new_state,
        ) else {
            return;
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let states: HashMap<String, Value> = updates
            .into_iter()
            .map(|(id, state)| (id, serde_json::to_value(state).unwrap_or(Value::Null)))
            .collect();

        if let Err(error) =
            self.home_graph.report_state_and_notification(&request_id, &event.user_id, states).await
        {
            let error = HomedError::HomeGraph(error.to_string());
            error!(user_id = %event.user_id, %error, "home graph reportStateAndNotification failed");
        }
    }

    /// `handleFulfillment(user, requestBody)`. Parses the
    /// request body strictly; a parse failure or a non-single `inputs`
    /// array is `INVALID_FULFILLMENT_REQUEST`.
    pub async fn handle_fulfillment(&self, user: &User, body: Value) -> Result<FulfillmentResponse, HomedError> {
        let request: FulfillmentRequest =
            serde_json::from_value(body).map_err(|e| HomedError::InvalidFulfillmentRequest(e.to_string()))?;

        let [intent] = request.inputs.as_slice() else {
            return Err(HomedError::InvalidFulfillmentRequest(format!(
                "expected exactly one element in inputs, got {}",
                request.inputs.len()
            )));
        };

        let payload = match intent {
            Intent::Sync => self.handle_sync(user).await,
            Intent::Query { devices } => self.handle_query(user, devices).await,
            Intent::Execute { commands } => self.handle_execute(user, commands).await,
            Intent::Disconnect => self.handle_disconnect(user).await,
        };

        Ok(FulfillmentResponse { request_id: request.request_id, payload })
    }

    /// SYNC: project every device with at least one endpoint, dropping any
    /// projected GoogleDevice whose inferred trait set ended up empty
    ///.
    async fn handle_sync(&self, user: &User) -> Value {
        let devices = self.devices.get_devices_with_state(&user.id).await;
        let google_devices: Vec<_> = devices
            .into_iter()
            .filter(|d| !d.device.endpoints.is_empty())
            .flat_map(|d| capability::map_to_google_devices(&d.device, &d.client_id))
            .filter(|gd| !gd.traits.is_empty())
            .collect();
        let payload = SyncPayload { agent_user_id: user.id.clone(), devices: google_devices };
        serde_json::to_value(payload).unwrap_or(Value::Null)
    }

    /// QUERY: map every device's state, but only report the ids Google
    /// actually asked about.
    async fn handle_query(&self, user: &User, requested: &[GoogleDeviceRef]) -> Value {
        let requested_ids: std::collections::HashSet<&str> = requested.iter().map(|r| r.id.as_str()).collect();
        let devices = self.devices.get_devices_with_state(&user.id).await;

        let mut result = serde_json::Map::new();
        for d in &devices {
            let states = capability::map_to_google_states(&d.device, &d.client_id, &d.state);
            for (id, state) in states {
                if requested_ids.contains(id.as_str()) {
                    result.insert(id, serde_json::to_value(state).unwrap_or(Value::Null));
                }
            }
        }
        json!({ "devices": result })
    }

    /// EXECUTE: plan commands per `(devices, execution)` group against the
    /// user's full device set, then forward each planned command and record
    /// its per-command outcome.
    async fn handle_execute(&self, user: &User, groups: &[ExecutionGroup]) -> Value {
        let all_devices: Vec<(HomedDevice, String)> = self
            .devices
            .get_devices(&user.id)
            .await
            .into_iter()
            .map(|d| (d.device, d.client_id))
            .collect();

        let mut results = Vec::new();
        for group in groups {
            let request = ExecutionRequest {
                user_id: user.id.clone(),
                google_device_ids: group.devices.iter().map(|d| d.id.clone()).collect(),
                commands: group.execution.clone(),
            };
            let plan = capability::map_execution_request(&request, &all_devices);

            for entry in plan {
                let reached = self
                    .devices
                    .execute_command(
                        &entry.user_id,
                        &entry.client_id,
                        &entry.device_key,
                        entry.endpoint_id,
                        entry.message,
                    )
                    .await;
                results.push(if reached {
                    ExecuteCommandResult { ids: entry.google_device_ids, status: ExecuteStatus::Success, error_code: None }
                } else {
                    let error = HomedError::DeviceOffline;
                    warn!(device_key = %entry.device_key, %error, "command could not be delivered");
                    ExecuteCommandResult {
                        ids: entry.google_device_ids,
                        status: ExecuteStatus::Offline,
                        error_code: Some("deviceOffline".to_string()),
                    }
                });
            }
        }
        json!({ "commands": results })
    }

    /// DISCONNECT: delete the user and remove their devices.
    async fn handle_disconnect(&self, user: &User) -> Value {
        if let Err(error) = self.users.delete_user(&user.id).await {
            error!(user_id = %user.id, %error, "failed to delete user on DISCONNECT");
        }
        self.devices.remove_client_devices(&user.id).await;
        json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homed_devices::model::HomedEndpoint;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FakeUserRepository;

    #[async_trait]
    impl UserRepository for FakeUserRepository {
        async fn find_by_token(&self, _token: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
        async fn delete_user(&self, _user_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct RecordingHomeGraph {
        sync_calls: AtomicUsize,
        reported: Mutex<Vec<(String, HashMap<String, Value>)>>,
        notify: Notify,
    }

    impl RecordingHomeGraph {
        fn new() -> Arc<Self> {
            Arc::new(Self { sync_calls: AtomicUsize::new(0), reported: Mutex::new(Vec::new()), notify: Notify::new() })
        }
    }

    #[async_trait]
    impl HomeGraphClient for RecordingHomeGraph {
        async fn request_sync(&self, _agent_user_id: &str) -> anyhow::Result<()> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }

        async fn report_state_and_notification(
            &self,
            _request_id: &str,
            agent_user_id: &str,
            states: HashMap<String, Value>,
        ) -> anyhow::Result<()> {
            self.reported.lock().unwrap().push((agent_user_id.to_string(), states));
            self.notify.notify_one();
            Ok(())
        }
    }

    fn sample_device(key: &str) -> HomedDevice {
        HomedDevice {
            key: key.to_string(),
            name: "Plug".to_string(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![HomedEndpoint { id: 0, exposes: vec!["switch".into()], options: None }],
            available: None,
        }
    }

    #[tokio::test]
    async fn sync_projects_only_devices_with_nonempty_traits() {
        let devices = Arc::new(DeviceRepository::new());
        devices.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        let home_graph = RecordingHomeGraph::new();
        let router = FulfillmentRouter::new(devices, home_graph, Arc::new(FakeUserRepository), Duration::from_millis(300));

        let user = User { id: "u-1".to_string() };
        let body = json!({"requestId": "r-1", "inputs": [{"intent": "action.devices.SYNC"}]});
        let response = router.handle_fulfillment(&user, body).await.unwrap();
        let devices = response.payload.get("devices").unwrap().as_array().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].get("id").unwrap(), "c-1/dev1");
    }

    #[tokio::test]
    async fn execute_reports_offline_for_unreachable_gateway() {
        let devices = Arc::new(DeviceRepository::new());
        devices.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        let home_graph = RecordingHomeGraph::new();
        let router = FulfillmentRouter::new(devices, home_graph, Arc::new(FakeUserRepository), Duration::from_millis(300));

        let user = User { id: "u-1".to_string() };
        let body = json!({
            "requestId": "r-2",
            "inputs": [{
                "intent": "action.devices.EXECUTE",
                "payload": {"commands": [{
                    "devices": [{"id": "c-1/dev1"}],
                    "execution": [{"command": "action.devices.commands.OnOff", "params": {"on": true}}],
                }]},
            }],
        });
        let response = router.handle_fulfillment(&user, body).await.unwrap();
        let commands = response.payload.get("commands").unwrap().as_array().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].get("status").unwrap(), "OFFLINE");
        assert_eq!(commands[0].get("errorCode").unwrap(), "deviceOffline");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_fulfillment_request() {
        let devices = Arc::new(DeviceRepository::new());
        let home_graph = RecordingHomeGraph::new();
        let router = FulfillmentRouter::new(devices, home_graph, Arc::new(FakeUserRepository), Duration::from_millis(300));

        let user = User { id: "u-1".to_string() };
        let body = json!({"requestId": "r-3", "inputs": []});
        let error = router.handle_fulfillment(&user, body).await.unwrap_err();
        assert_eq!(error.error_code(), "INVALID_FULFILLMENT_REQUEST");
    }

    #[tokio::test(start_paused = true)]
    async fn devices_updated_triggers_debounced_request_sync() {
        let devices = Arc::new(DeviceRepository::new());
        let home_graph = RecordingHomeGraph::new();
        let _router =
            FulfillmentRouter::new(devices.clone(), home_graph.clone(), Arc::new(FakeUserRepository), Duration::from_millis(300));

        for _ in 0..5 {
            devices.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        tokio::time::advance(Duration::from_millis(400)).await;
        home_graph.notify.notified().await;
        assert_eq!(home_graph.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn state_change_reports_only_when_google_state_actually_differs() {
        let devices = Arc::new(DeviceRepository::new());
        devices.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        let home_graph = RecordingHomeGraph::new();
        let _router =
            FulfillmentRouter::new(devices.clone(), home_graph.clone(), Arc::new(FakeUserRepository), Duration::from_millis(300));

        devices
            .merge_device_state("u-1", "c-1", "dev1", homed_devices::model::DeviceState::from([("on".into(), json!(true))]))
            .await;
        home_graph.notify.notified().await;
        let reported = home_graph.reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "u-1");
        assert_eq!(reported[0].1.get("c-1/dev1").unwrap().get("on").unwrap(), true);
    }
}
