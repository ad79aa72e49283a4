//! The TCP accept loop: binds a listener, spawns one [`GatewayConnection`]
//! per socket, and wires its typed event stream into the external
//! [`AuthorizationService`] and the [`DeviceRepository`].

use std::net::SocketAddr;
use std::sync::Arc;

use homed_common::ports::AuthorizationService;
use homed_common::HomedError;
use homed_devices::model::{DeviceState, HomedDevice, HomedEndpoint};
use homed_devices::DeviceRepository;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionConfig, ConnectionEvent, GatewayConnection};
use crate::crypto;
use crate::wire::ExposeMessage;

/// Bind `bind_addr` and accept gateway connections forever, each on its own
/// task. Returns only on a fatal bind error.
pub async fn run(
    bind_addr: SocketAddr,
    config: ConnectionConfig,
    repository: Arc<DeviceRepository>,
    authorization: Arc<dyn AuthorizationService>,
) -> Result<(), HomedError> {
    let listener = TcpListener::bind(bind_addr).await.map_err(HomedError::Io)?;
    info!(%bind_addr, "gateway listener bound");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(error) => {
                warn!(%error, "gateway accept failed");
                continue;
            }
        };
        let repository = repository.clone();
        let authorization = authorization.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, config, repository, authorization).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: ConnectionConfig,
    repository: Arc<DeviceRepository>,
    authorization: Arc<dyn AuthorizationService>,
) {
    let (conn, mut events) = GatewayConnection::spawn(stream, config, crypto::random_secret);
    let mut user_id: Option<String> = None;
    let mut client_id: Option<String> = None;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Token { unique_id, token } => {
                match authorization.authorize(&unique_id, &token).await {
                    Ok(Some(user)) => {
                        conn.authorize().await;
                        let connection: Arc<dyn homed_devices::DeviceConnection> = Arc::new(conn.clone());
                        repository.register_connection(&user.id, &unique_id, connection).await;
                        debug!(%peer, unique_id, user_id = %user.id, "gateway authorized");
                        user_id = Some(user.id);
                        client_id = Some(unique_id);
                    }
                    Ok(None) => {
                        warn!(%peer, unique_id, "gateway token rejected");
                        conn.close("unauthorized").await;
                    }
                    Err(error) => {
                        warn!(%peer, unique_id, %error, "authorization lookup failed");
                        conn.close("authorization lookup failed").await;
                    }
                }
            }
            ConnectionEvent::Status { client_id: status_client_id, status } => {
                let (Some(user_id), Some(client_id)) = (user_id.as_deref(), client_id.as_deref()) else {
                    continue;
                };
                debug_assert_eq!(status_client_id, client_id, "status topic client id must match the authorized gateway");
                let Some(devices) = status.devices else { continue };
                for info in devices {
                    let key = info.ieee_address.clone();
                    let mut device = repository
                        .get_device(user_id, client_id, &key)
                        .await
                        .unwrap_or_else(|| HomedDevice {
                            key: key.clone(),
                            name: key.clone(),
                            description: None,
                            manufacturer: None,
                            model: None,
                            version: None,
                            firmware: None,
                            endpoints: Vec::new(),
                            available: None,
                        });
                    if let Some(name) = info.name {
                        device.name = name;
                    }
                    device.description = info.description.or(device.description);
                    device.manufacturer = info.manufacturer_name.or(device.manufacturer);
                    device.model = info.model_name.or(device.model);
                    device.firmware = info.firmware.or(device.firmware);
                    device.version = info.version.or(device.version);
                    if let Some(active) = info.active {
                        device.available = Some(active);
                    }
                    repository.upsert_device(user_id, client_id, device).await;
                }
            }
            ConnectionEvent::Expose { device_key, expose } => {
                let (Some(user_id), Some(client_id)) = (user_id.as_deref(), client_id.as_deref()) else {
                    continue;
                };
                let mut device =
                    repository.get_device(user_id, client_id, &device_key).await.unwrap_or_else(|| HomedDevice {
                        key: device_key.clone(),
                        name: device_key.clone(),
                        description: None,
                        manufacturer: None,
                        model: None,
                        version: None,
                        firmware: None,
                        endpoints: Vec::new(),
                        available: None,
                    });
                device.endpoints = endpoints_from_expose(expose);
                repository.upsert_device(user_id, client_id, device).await;
            }
            ConnectionEvent::Device { device_key, status } => {
                let (Some(user_id), Some(client_id)) = (user_id.as_deref(), client_id.as_deref()) else {
                    continue;
                };
                let available = status.status == "online";
                let patch = DeviceState::from([("available".to_string(), serde_json::json!(available))]);
                repository.merge_device_state(user_id, client_id, &device_key, patch).await;
            }
            ConnectionEvent::Fd { device_key, state } => {
                let (Some(user_id), Some(client_id)) = (user_id.as_deref(), client_id.as_deref()) else {
                    continue;
                };
                repository.merge_device_state(user_id, client_id, &device_key, state).await;
            }
            ConnectionEvent::Closed { reason } => {
                debug!(%peer, reason, "gateway connection closed");
                if let (Some(user_id), Some(client_id)) = (user_id.as_deref(), client_id.as_deref()) {
                    repository.unregister_connection(user_id, client_id).await;
                }
                break;
            }
        }
    }
}

fn endpoints_from_expose(expose: ExposeMessage) -> Vec<HomedEndpoint> {
    let mut endpoints: Vec<HomedEndpoint> = expose
        .into_iter()
        .map(|(id, info)| HomedEndpoint {
            id: id.parse().unwrap_or(0),
            exposes: info.items,
            options: info.options.and_then(|v| serde_json::from_value(v).ok()),
        })
        .collect();
    endpoints.sort_by_key(|e| e.id);
    endpoints
}
