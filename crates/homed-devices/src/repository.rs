//! The device repository: the sole shared mutable resource,
//! owning the canonical `(userId, clientId, deviceKey)` keyed device set,
//! its last observed state, and the gateway connections that can reach it.
//!
//! Grounded on the teacher's in-memory registry pattern
//! (`nexus-gateway::registry::ConnectionRegistry`): an `RwLock`-guarded map
//! plus `tokio::sync::broadcast` change feeds, generalized from "one
//! connection per key" to "one client's device set, with its own change
//! history, per key".

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::model::{DeviceState, HomedDevice};

/// A gateway connection capable of forwarding a command, as seen from the
/// repository's point of view. Implemented by `homed-gateway`'s
/// `GatewayConnection` (orphan rules allow this: the trait is foreign to
/// that crate, but the type is local to it).
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    fn is_authorized(&self) -> bool;

    async fn send_command(
        &self,
        message: serde_json::Value,
        device_id: &str,
        endpoint_id: Option<u32>,
    ) -> anyhow::Result<()>;
}

/// `{ device, clientId }`.
#[derive(Debug, Clone)]
pub struct DeviceWithClient {
    pub device: HomedDevice,
    pub client_id: String,
}

/// `{ device, clientId, state }`.
#[derive(Debug, Clone)]
pub struct DeviceWithState {
    pub device: HomedDevice,
    pub client_id: String,
    pub state: DeviceState,
}

/// Emitted when a user's device set or device capabilities changed.
#[derive(Debug, Clone)]
pub struct DevicesUpdated {
    pub user_id: String,
}

/// Emitted when a single device's state changed. Both snapshots are full, not partial.
#[derive(Debug, Clone)]
pub struct DeviceStateChanged {
    pub user_id: String,
    pub client_id: String,
    pub device: HomedDevice,
    pub prev_state: DeviceState,
    pub new_state: DeviceState,
}

struct ClientEntry {
    devices: HashMap<String, HomedDevice>,
    states: HashMap<String, DeviceState>,
    connection: Option<Arc<dyn DeviceConnection>>,
}

impl ClientEntry {
    fn new() -> Self {
        Self { devices: HashMap::new(), states: HashMap::new(), connection: None }
    }
}

/// The in-memory device repository. Cheaply cloneable (`Arc`-backed
/// internally is not required since it is always held behind one shared
/// `Arc<DeviceRepository>` by callers).
pub struct DeviceRepository {
    // Keyed by (userId, clientId). A single `RwLock` over the whole map is
    // the simplest policy that still satisfies "writes to a given
    // (userId, clientId, deviceKey) are serialized" — a finer-
    // grained per-client lock would add complexity with no gain at this
    // scale.
    clients: RwLock<HashMap<(String, String), ClientEntry>>,
    devices_updated_tx: broadcast::Sender<DevicesUpdated>,
    state_changed_tx: broadcast::Sender<DeviceStateChanged>,
}

impl Default for DeviceRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRepository {
    pub fn new() -> Self {
        let (devices_updated_tx, _) = broadcast::channel(256);
        let (state_changed_tx, _) = broadcast::channel(256);
        Self { clients: RwLock::new(HashMap::new()), devices_updated_tx, state_changed_tx }
    }

    pub fn subscribe_devices_updated(&self) -> broadcast::Receiver<DevicesUpdated> {
        self.devices_updated_tx.subscribe()
    }

    pub fn subscribe_state_changed(&self) -> broadcast::Receiver<DeviceStateChanged> {
        self.state_changed_tx.subscribe()
    }

    /// Bind a gateway connection to `(userId, clientId)` so that
    /// `execute_command` can reach it.
    pub async fn register_connection(
        &self,
        user_id: &str,
        client_id: &str,
        connection: Arc<dyn DeviceConnection>,
    ) {
        let mut clients = self.clients.write().await;
        let entry = clients.entry((user_id.to_string(), client_id.to_string())).or_insert_with(ClientEntry::new);
        entry.connection = Some(connection);
    }

    /// Drop a connection binding (e.g. on socket close) without discarding
    /// the last known devices/state — a gateway reconnecting shortly after
    /// should not look like its devices vanished.
    pub async fn unregister_connection(&self, user_id: &str, client_id: &str) {
        let mut clients = self.clients.write().await;
        if let Some(entry) = clients.get_mut(&(user_id.to_string(), client_id.to_string())) {
            entry.connection = None;
        }
    }

    /// Replace the declared device set for `(userId, clientId)` (from a
    /// `status/*` batch), preserving existing state for devices that
    /// survive. Emits `devicesUpdated`.
    pub async fn replace_devices(&self, user_id: &str, client_id: &str, devices: Vec<HomedDevice>) {
        let mut clients = self.clients.write().await;
        let entry = clients.entry((user_id.to_string(), client_id.to_string())).or_insert_with(ClientEntry::new);
        entry.states.retain(|key, _| devices.iter().any(|d| &d.key == key));
        entry.devices = devices.into_iter().map(|d| (d.key.clone(), d)).collect();
        drop(clients);
        self.emit_devices_updated(user_id);
    }

    /// Declare or update a single device's capability descriptor (from an
    /// `expose/*` message), leaving its last observed state untouched.
    /// Emits `devicesUpdated`.
    pub async fn upsert_device(&self, user_id: &str, client_id: &str, device: HomedDevice) {
        let mut clients = self.clients.write().await;
        let entry = clients.entry((user_id.to_string(), client_id.to_string())).or_insert_with(ClientEntry::new);
        entry.devices.insert(device.key.clone(), device);
        drop(clients);
        self.emit_devices_updated(user_id);
    }

    fn emit_devices_updated(&self, user_id: &str) {
        let _ = self.devices_updated_tx.send(DevicesUpdated { user_id: user_id.to_string() });
    }

    /// Merge `patch` into a device's last observed state (from an `fd/*`
    /// reading, or an `available` flip from a `device/*` status message).
    /// Emits `deviceStateChanged` with full before/after snapshots.
    pub async fn merge_device_state(
        &self,
        user_id: &str,
        client_id: &str,
        device_key: &str,
        patch: DeviceState,
    ) {
        let mut clients = self.clients.write().await;
        let Some(entry) = clients.get_mut(&(user_id.to_string(), client_id.to_string())) else {
            warn!(user_id, client_id, device_key, "state update for unknown client");
            return;
        };
        let Some(device) = entry.devices.get(device_key).cloned() else {
            debug!(user_id, client_id, device_key, "state update for unknown device");
            return;
        };
        let prev_state = entry.states.get(device_key).cloned().unwrap_or_default();
        let mut new_state = prev_state.clone();
        for (k, v) in patch {
            new_state.insert(k, v);
        }
        entry.states.insert(device_key.to_string(), new_state.clone());
        drop(clients);

        let _ = self.state_changed_tx.send(DeviceStateChanged {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            device,
            prev_state,
            new_state,
        });
    }

    /// `getDevices(userId)`.
    pub async fn get_devices(&self, user_id: &str) -> Vec<DeviceWithClient> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .flat_map(|((_, client_id), entry)| {
                entry.devices.values().map(move |d| DeviceWithClient { device: d.clone(), client_id: client_id.clone() })
            })
            .collect()
    }

    /// `getDevicesWithState(userId)`.
    pub async fn get_devices_with_state(&self, user_id: &str) -> Vec<DeviceWithState> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .flat_map(|((_, client_id), entry)| {
                entry.devices.values().map(move |d| DeviceWithState {
                    device: d.clone(),
                    client_id: client_id.clone(),
                    state: entry.states.get(&d.key).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Look up a single device's current capability descriptor. Used by
    /// the gateway listener to merge incremental `status/*`/`expose/*`
    /// updates onto what's already known, rather than overwriting it.
    pub async fn get_device(&self, user_id: &str, client_id: &str, device_key: &str) -> Option<HomedDevice> {
        let clients = self.clients.read().await;
        clients.get(&(user_id.to_string(), client_id.to_string()))?.devices.get(device_key).cloned()
    }

    /// `getDeviceState(userId, clientId, deviceKey)`.
    pub async fn get_device_state(&self, user_id: &str, client_id: &str, device_key: &str) -> Option<DeviceState> {
        let clients = self.clients.read().await;
        clients.get(&(user_id.to_string(), client_id.to_string()))?.states.get(device_key).cloned()
    }

    /// `removeClientDevices(userId)`.
    /// Despite the name, this removes every client's devices for the user
    /// — matching spec.md §4.G's DISCONNECT semantics ("deletes the user
    /// and removes their devices").
    pub async fn remove_client_devices(&self, user_id: &str) {
        let mut clients = self.clients.write().await;
        clients.retain(|(u, _), _| u != user_id);
        drop(clients);
        self.emit_devices_updated(user_id);
    }

    /// `executeCommand(userId, clientId, deviceId, endpointId?, message)`
    ///. Returns `true` iff the gateway is currently
    /// authorized and reachable.
    pub async fn execute_command(
        &self,
        user_id: &str,
        client_id: &str,
        device_key: &str,
        endpoint_id: Option<u32>,
        message: serde_json::Value,
    ) -> bool {
        let connection = {
            let clients = self.clients.read().await;
            clients.get(&(user_id.to_string(), client_id.to_string())).and_then(|e| e.connection.clone())
        };
        let Some(connection) = connection else {
            return false;
        };
        if !connection.is_authorized() {
            return false;
        }
        match connection.send_command(message, device_key, endpoint_id).await {
            Ok(()) => true,
            Err(error) => {
                warn!(user_id, client_id, device_key, %error, "failed to forward command to gateway");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeConnection {
        authorized: AtomicBool,
        sent: std::sync::Mutex<Vec<(serde_json::Value, String, Option<u32>)>>,
    }

    #[async_trait]
    impl DeviceConnection for FakeConnection {
        fn is_authorized(&self) -> bool {
            self.authorized.load(Ordering::SeqCst)
        }

        async fn send_command(
            &self,
            message: serde_json::Value,
            device_id: &str,
            endpoint_id: Option<u32>,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((message, device_id.to_string(), endpoint_id));
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
            endpoints: vec![crate::model::HomedEndpoint { id: 0, exposes: vec!["switch".into()], options: None }],
            available: None,
        }
    }

    #[tokio::test]
    async fn replace_devices_emits_devices_updated() {
        let repo = DeviceRepository::new();
        let mut rx = repo.subscribe_devices_updated();
        repo.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "u-1");
        assert_eq!(repo.get_devices("u-1").await.len(), 1);
    }

    #[tokio::test]
    async fn merge_device_state_preserves_untouched_keys_and_emits_change() {
        let repo = DeviceRepository::new();
        repo.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        let mut rx = repo.subscribe_state_changed();

        repo.merge_device_state("u-1", "c-1", "dev1", DeviceState::from([("on".to_string(), json!(true))])).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.prev_state.len(), 0);
        assert_eq!(first.new_state.get("on"), Some(&json!(true)));

        repo.merge_device_state("u-1", "c-1", "dev1", DeviceState::from([("power".to_string(), json!(4.2))])).await;
        let second = rx.recv().await.unwrap();
        assert_eq!(second.new_state.get("on"), Some(&json!(true)));
        assert_eq!(second.new_state.get("power"), Some(&json!(4.2)));
    }

    #[tokio::test]
    async fn execute_command_false_when_not_authorized_or_unregistered() {
        let repo = DeviceRepository::new();
        repo.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        assert!(!repo.execute_command("u-1", "c-1", "dev1", None, json!({"status":"on"})).await);

        let conn = Arc::new(FakeConnection { authorized: AtomicBool::new(false), sent: Default::default() });
        repo.register_connection("u-1", "c-1", conn.clone()).await;
        assert!(!repo.execute_command("u-1", "c-1", "dev1", None, json!({"status":"on"})).await);

        conn.authorized.store(true, Ordering::SeqCst);
        assert!(repo.execute_command("u-1", "c-1", "dev1", None, json!({"status":"on"})).await);
        assert_eq!(conn.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_client_devices_clears_all_of_a_users_clients() {
        let repo = DeviceRepository::new();
        repo.replace_devices("u-1", "c-1", vec![sample_device("dev1")]).await;
        repo.replace_devices("u-1", "c-2", vec![sample_device("dev2")]).await;
        repo.remove_client_devices("u-1").await;
        assert!(repo.get_devices("u-1").await.is_empty());
    }
}
