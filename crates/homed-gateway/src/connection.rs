//! Per-socket state machine.
//!
//! Each [`GatewayConnection`] owns exactly one TCP socket. A single spawned
//! receive-loop task drives the handshake → authenticating → authorized
//! progression purely off bytes arriving (no polling); outbound sends
//! (`subscribe`, `command`) go through a write half guarded by a mutex so
//! they can be called concurrently from other tasks (the device
//! repository's `executeCommand`), so only one send is ever in flight on a
//! connection at a time.
//!
//! The receive loop and send path are split the way a socket actor
//! typically is, and every transition the loop can observe is surfaced as
//! a distinct, typed [`ConnectionEvent`] variant rather than an untyped
//! string event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use homed_common::{HomedError, HomedResult};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use crate::crypto::{self, DhPreamble, StreamCipher};
use crate::frame;
use crate::wire::{
    AuthMessage, ClientMessage, DeviceStateMessage, DeviceStatusMessage, ExposeMessage,
    ServerMessage, StatusMessage, TopicKind,
};

/// Lifecycle state of a gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    AwaitingAuth,
    Authorized,
    Closed,
}

/// Tunables for a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub handshake_timeout: Duration,
    pub max_receive_buffer_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_receive_buffer_bytes: 100 * 1024,
        }
    }
}

/// Typed events a connection emits in receive order.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Emitted once, after the first encrypted message parses as a valid
    /// `{uniqueId, token}` auth message. The outer authorization service
    /// resolves this to a user and calls [`GatewayConnection::authorize`].
    Token { unique_id: String, token: String },
    Status { client_id: String, status: StatusMessage },
    Expose { device_key: String, expose: ExposeMessage },
    Device { device_key: String, status: DeviceStatusMessage },
    Fd { device_key: String, state: DeviceStateMessage },
    /// The connection tore down; no further events follow.
    Closed { reason: String },
}

/// State shared between the receive-loop task and the handle held by
/// external callers (the device repository, the authorization service).
struct Shared {
    write_half: Mutex<OwnedWriteHalf>,
    cipher: RwLock<Option<StreamCipher>>,
    state: RwLock<ConnectionState>,
    unique_id: RwLock<Option<String>>,
    authorized_notify: Notify,
    close_notify: Notify,
    events_tx: mpsc::Sender<ConnectionEvent>,
    /// Mirrors `state == Authorized` for the synchronous
    /// `DeviceConnection::is_authorized` check the device repository uses
    /// without needing to `.await` a lock.
    authorized: AtomicBool,
}

/// A handle to a live gateway connection. Cheaply cloneable; every clone
/// refers to the same underlying socket and receive loop.
#[derive(Clone)]
pub struct GatewayConnection {
    shared: Arc<Shared>,
}

impl GatewayConnection {
    /// Accept a freshly connected socket and spawn its receive loop.
    /// Returns the handle plus the channel of events the loop will push.
    ///
    /// `secret_exponent` lets callers pin the DH secret `s` for tests
    ///; production callers should
    /// pass [`crypto::random_secret`].
    pub fn spawn(
        stream: TcpStream,
        config: ConnectionConfig,
        secret_exponent: impl Fn() -> u32 + Send + 'static,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (events_tx, events_rx) = mpsc::channel(256);
        let shared = Arc::new(Shared {
            write_half: Mutex::new(write_half),
            cipher: RwLock::new(None),
            state: RwLock::new(ConnectionState::AwaitingHandshake),
            unique_id: RwLock::new(None),
            authorized_notify: Notify::new(),
            close_notify: Notify::new(),
            events_tx: events_tx.clone(),
            authorized: AtomicBool::new(false),
        });

        let loop_shared = shared.clone();
        tokio::spawn(async move {
            receive_loop(read_half, loop_shared, config, events_tx, secret_exponent).await;
        });

        (Self { shared }, events_rx)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn unique_id(&self) -> Option<String> {
        self.shared.unique_id.read().await.clone()
    }

    /// Called by the external authorization service once a gateway's auth
    /// token has been validated. Transitions `AWAITING_AUTH` →
    /// `AUTHORIZED` and cancels the handshake/auth deadline. A no-op if
    /// the connection isn't currently awaiting authorization (already
    /// authorized, or already closed).
    pub async fn authorize(&self) {
        let mut state = self.shared.state.write().await;
        if *state == ConnectionState::AwaitingAuth {
            *state = ConnectionState::Authorized;
            drop(state);
            self.shared.authorized.store(true, Ordering::SeqCst);
            self.shared.authorized_notify.notify_one();
        }
    }

    /// Force the connection closed from outside the receive loop — used
    /// when external authorization explicitly rejects a gateway's token.
    /// A no-op if the connection is already closed.
    pub async fn close(&self, reason: impl Into<String>) {
        let mut state = self.shared.state.write().await;
        if *state == ConnectionState::Closed {
            return;
        }
        *state = ConnectionState::Closed;
        drop(state);
        self.shared.authorized.store(false, Ordering::SeqCst);
        let _ = self
            .shared
            .events_tx
            .send(ConnectionEvent::Closed { reason: reason.into() })
            .await;
        self.shared.close_notify.notify_one();
    }

    /// `subscribe(topic)`: send `{ action: "subscribe", topic }`
    /// framed+encrypted.
    pub async fn subscribe(&self, topic: &str) -> Result<(), HomedError> {
        self.send(&ServerMessage::subscribe(topic)).await
    }

    /// `command(action, deviceId)`: derive `command/<transport-prefix>`
    /// from everything in `device_id` up to the last `/`, and publish the
    /// mapped command object with `device: <last segment>`, `service:
    /// "cloud"`, and (when present) `endpointId` merged in.
    pub async fn command(
        &self,
        action: Value,
        device_id: &str,
        endpoint_id: Option<u32>,
    ) -> Result<(), HomedError> {
        let (prefix, last_segment) = match device_id.rsplit_once('/') {
            Some((prefix, last)) => (prefix, last),
            None => ("", device_id),
        };
        let topic = format!("command/{prefix}");
        let mut message = match action {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("action".to_string(), other);
                map
            }
        };
        message.insert("device".to_string(), Value::String(last_segment.to_string()));
        message.insert("service".to_string(), Value::String("cloud".to_string()));
        if let Some(id) = endpoint_id {
            message.insert("endpointId".to_string(), Value::Number(id.into()));
        }
        self.send(&ServerMessage::publish(topic, Value::Object(message))).await
    }

    async fn send(&self, message: &ServerMessage) -> Result<(), HomedError> {
        let cipher_guard = self.shared.cipher.read().await;
        let cipher = cipher_guard
            .as_ref()
            .expect("send attempted before cipher initialization (programmer error)");

        let plaintext = serde_json::to_vec(message)
            .map_err(|e| HomedError::Protocol(format!("failed to serialize outbound message: {e}")))?;
        let ciphertext = cipher.encrypt(&plaintext);
        let escaped = frame::escape(&ciphertext);

        let mut framed = Vec::with_capacity(escaped.len() + 2);
        framed.push(frame::START);
        framed.extend_from_slice(&escaped);
        framed.push(frame::END);

        let mut write_half = self.shared.write_half.lock().await;
        write_half
            .write_all(&framed)
            .await
            .map_err(HomedError::Io)?;
        Ok(())
    }
}

/// Lets the device repository (`homed-devices`) forward commands without
/// depending on this crate's connection type directly — only on the port
/// trait it owns.
#[async_trait::async_trait]
impl homed_devices::DeviceConnection for GatewayConnection {
    fn is_authorized(&self) -> bool {
        self.shared.authorized.load(Ordering::SeqCst)
    }

    async fn send_command(
        &self,
        message: Value,
        device_id: &str,
        endpoint_id: Option<u32>,
    ) -> anyhow::Result<()> {
        self.command(message, device_id, endpoint_id).await.map_err(Into::into)
    }
}

/// Tear the connection down after a fatal [`HomedError`] (or a plain,
/// non-error shutdown reason such as the peer closing its side). The
/// error's `Display` text becomes the [`ConnectionEvent::Closed`] reason.
async fn close(shared: &Shared, events_tx: &mpsc::Sender<ConnectionEvent>, reason: impl Into<CloseReason>) {
    let reason = reason.into().0;
    *shared.state.write().await = ConnectionState::Closed;
    shared.authorized.store(false, Ordering::SeqCst);
    let _ = events_tx.send(ConnectionEvent::Closed { reason }).await;
}

/// Wraps whatever tore a connection down — a typed [`HomedError`] for the
/// protocol/crypto/timeout/overflow paths §7 names, or a plain string for
/// ordinary non-error shutdowns (peer hangup, a socket-level read error).
struct CloseReason(String);

impl From<HomedError> for CloseReason {
    fn from(error: HomedError) -> Self {
        Self(error.to_string())
    }
}

impl From<&str> for CloseReason {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for CloseReason {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

async fn receive_loop(
    mut read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    config: ConnectionConfig,
    events_tx: mpsc::Sender<ConnectionEvent>,
    secret_exponent: impl Fn() -> u32,
) {
    let deadline = tokio::time::sleep(config.handshake_timeout);
    tokio::pin!(deadline);

    let mut buffer: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; 8192];

    loop {
        let current_state = *shared.state.read().await;
        if current_state == ConnectionState::Closed {
            return;
        }

        tokio::select! {
            biased;

            _ = &mut deadline, if current_state != ConnectionState::Authorized => {
                let error = match current_state {
                    ConnectionState::AwaitingHandshake => HomedError::Timeout("handshake timeout".to_string()),
                    ConnectionState::AwaitingAuth => HomedError::Timeout("authorization timeout".to_string()),
                    _ => HomedError::Timeout("timeout".to_string()),
                };
                tracing::warn!(%error, "gateway connection timed out");
                close(&shared, &events_tx, error).await;
                return;
            }

            _ = shared.close_notify.notified() => {
                // `GatewayConnection::close` already set state and sent the
                // `Closed` event; just stop driving the loop.
                return;
            }

            _ = shared.authorized_notify.notified() => {
                if let Err(error) = drain(&mut buffer, &shared, &events_tx, &secret_exponent).await {
                    tracing::warn!(%error, "gateway connection closing after authorize-triggered drain");
                    close(&shared, &events_tx, error).await;
                    return;
                }
            }

            read_result = read_half.read(&mut read_buf) => {
                match read_result {
                    Ok(0) => {
                        close(&shared, &events_tx, "peer closed connection").await;
                        return;
                    }
                    Ok(n) => {
                        buffer.extend_from_slice(&read_buf[..n]);
                        if buffer.len() > config.max_receive_buffer_bytes {
                            let error = HomedError::BufferOverflow { limit: config.max_receive_buffer_bytes };
                            tracing::warn!(%error, "gateway receive buffer overflow");
                            close(&shared, &events_tx, error).await;
                            return;
                        }
                        if let Err(error) = drain(&mut buffer, &shared, &events_tx, &secret_exponent).await {
                            tracing::warn!(%error, "gateway connection closing after protocol error");
                            close(&shared, &events_tx, error).await;
                            return;
                        }
                    }
                    Err(e) => {
                        close(&shared, &events_tx, HomedError::Io(e)).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Drain as much of `buffer` as the current state allows. Returns `Err`
/// with a close reason on any fatal protocol/crypto/schema error; schema
/// failures while `AUTHORIZED` are reported via `tracing::warn!` and
/// swallowed (`SCHEMA_ERROR`/`UNKNOWN_TOPIC` are recoverable, not fatal to
/// the connection).
async fn drain(
    buffer: &mut Vec<u8>,
    shared: &Shared,
    events_tx: &mpsc::Sender<ConnectionEvent>,
    secret_exponent: &impl Fn() -> u32,
) -> HomedResult<()> {
    loop {
        let state = *shared.state.read().await;
        match state {
            ConnectionState::AwaitingHandshake => {
                if buffer.len() < crypto::PREAMBLE_LEN {
                    return Ok(());
                }
                let preamble_bytes: [u8; crypto::PREAMBLE_LEN] =
                    buffer[..crypto::PREAMBLE_LEN].try_into().unwrap();
                *buffer = buffer[crypto::PREAMBLE_LEN..].to_vec();

                let preamble = DhPreamble::parse(&preamble_bytes);
                if preamble.p == 0 {
                    return Err(HomedError::Protocol("invalid handshake: zero modulus".to_string()));
                }
                let s = secret_exponent();
                let handshake = crypto::server_handshake(&preamble, s);
                let cipher = StreamCipher::from_shared_secret(handshake.shared_secret);

                {
                    let mut write_half = shared.write_half.lock().await;
                    write_half
                        .write_all(&handshake.server_public.to_be_bytes())
                        .await
                        .map_err(HomedError::Io)?;
                }

                *shared.cipher.write().await = Some(cipher);
                *shared.state.write().await = ConnectionState::AwaitingAuth;
                // Loop again: the same read may have delivered the first
                // encrypted auth frame right behind the 12-byte preamble.
            }

            ConnectionState::AwaitingAuth => {
                let (packet, remainder) = frame::read(buffer);
                let Some(packet) = packet else { return Ok(()) };
                *buffer = remainder;

                let plaintext = decrypt_packet(shared, &packet).await?;
                let auth: AuthMessage = serde_json::from_slice(&plaintext)
                    .map_err(|e| HomedError::Protocol(format!("invalid auth message: {e}")))?;

                *shared.unique_id.write().await = Some(auth.unique_id.clone());
                let _ = events_tx
                    .send(ConnectionEvent::Token {
                        unique_id: auth.unique_id,
                        token: auth.token,
                    })
                    .await;
                // Remain in AWAITING_AUTH until `authorize()` is called
                // externally; further buffered bytes stay buffered.
                return Ok(());
            }

            ConnectionState::Authorized => {
                let (packet, remainder) = frame::read(buffer);
                let Some(packet) = packet else { return Ok(()) };
                *buffer = remainder;

                let plaintext = decrypt_packet(shared, &packet).await?;
                let client_msg: ClientMessage = serde_json::from_slice(&plaintext)
                    .map_err(|e| HomedError::Protocol(format!("invalid JSON while authorized: {e}")))?;

                if let Err(error) = route_authorized_message(&client_msg, events_tx).await {
                    debug_assert!(!error.is_fatal_to_connection(), "routing errors must be recoverable, not fatal");
                    tracing::warn!(%error, topic = %client_msg.topic, "dropping invalid gateway message");
                }
                // Loop again — there may be more than one frame per read.
            }

            ConnectionState::Closed => return Ok(()),
        }
    }
}

async fn decrypt_packet(shared: &Shared, packet: &[u8]) -> HomedResult<Vec<u8>> {
    let unescaped = frame::unescape(packet).map_err(|e| HomedError::Framing(e.to_string()))?;
    let cipher_guard = shared.cipher.read().await;
    let cipher = cipher_guard
        .as_ref()
        .ok_or_else(|| HomedError::Crypto("decrypt attempted before cipher initialization".to_string()))?;
    cipher
        .decrypt(&unescaped)
        .map_err(|e| HomedError::Crypto(e.to_string()))
}

/// Route one authorized-state message by topic prefix to its typed event.
/// Returns a recoverable [`HomedError::Schema`]/[`HomedError::UnknownTopic`]
/// on failure — the caller logs and continues, it never tears the
/// connection down.
async fn route_authorized_message(
    client_msg: &ClientMessage,
    events_tx: &mpsc::Sender<ConnectionEvent>,
) -> HomedResult<()> {
    let Some(kind) = TopicKind::classify(&client_msg.topic) else {
        return Err(HomedError::UnknownTopic(client_msg.topic.clone()));
    };

    // Everything after the prefix's trailing slash: the client id or
    // device key the topic names.
    let key = client_msg
        .topic
        .split_once('/')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_default();

    let payload = client_msg.message.clone().unwrap_or(Value::Null);

    let event = match kind {
        TopicKind::Status => {
            let status: StatusMessage = serde_json::from_value(payload)
                .map_err(|e| HomedError::Schema(format!("status message: {e}")))?;
            ConnectionEvent::Status { client_id: key, status }
        }
        TopicKind::Expose => {
            let expose: ExposeMessage = serde_json::from_value(payload)
                .map_err(|e| HomedError::Schema(format!("expose message: {e}")))?;
            ConnectionEvent::Expose { device_key: key, expose }
        }
        TopicKind::Device => {
            let status: DeviceStatusMessage = serde_json::from_value(payload)
                .map_err(|e| HomedError::Schema(format!("device status message: {e}")))?;
            ConnectionEvent::Device { device_key: key, status }
        }
        TopicKind::Fd => {
            let state: DeviceStateMessage = serde_json::from_value(payload)
                .map_err(|e| HomedError::Schema(format!("fd message: {e}")))?;
            ConnectionEvent::Fd { device_key: key, state }
        }
    };

    let _ = events_tx.send(event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    async fn connect_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn handshake_then_auth_flow() {
        let (mut client, server) = connect_pair().await;

        let config = ConnectionConfig {
            handshake_timeout: Duration::from_secs(10),
            max_receive_buffer_bytes: 100 * 1024,
        };
        let (conn, mut events) = GatewayConnection::spawn(server, config, || 6);

        // p=23, g=5, A=8: small toy parameters, easy to hand-verify.
        let mut preamble = Vec::new();
        preamble.extend_from_slice(&23u32.to_be_bytes());
        preamble.extend_from_slice(&5u32.to_be_bytes());
        preamble.extend_from_slice(&8u32.to_be_bytes());
        client.write_all(&preamble).await.unwrap();

        let mut server_public = [0u8; 4];
        client.read_exact(&mut server_public).await.unwrap();
        assert_eq!(u32::from_be_bytes(server_public), 8);

        assert_eq!(conn.state().await, ConnectionState::AwaitingAuth);

        let cipher = StreamCipher::from_shared_secret(13); // A^s mod p, see crypto tests
        let auth_json = br#"{"uniqueId":"c-1","token":"t-1"}"#;
        let ciphertext = cipher.encrypt(auth_json);
        let escaped = frame::escape(&ciphertext);
        let mut framed = vec![frame::START];
        framed.extend_from_slice(&escaped);
        framed.push(frame::END);
        client.write_all(&framed).await.unwrap();

        let event = events.recv().await.unwrap();
        match event {
            ConnectionEvent::Token { unique_id, token } => {
                assert_eq!(unique_id, "c-1");
                assert_eq!(token, "t-1");
            }
            other => panic!("expected Token event, got {other:?}"),
        }

        assert_eq!(conn.unique_id().await, Some("c-1".to_string()));
        assert_eq!(conn.state().await, ConnectionState::AwaitingAuth);

        conn.authorize().await;
        assert_eq!(conn.state().await, ConnectionState::Authorized);
    }

    #[tokio::test]
    async fn buffer_overflow_closes_connection() {
        let (mut client, server) = connect_pair().await;
        let config = ConnectionConfig {
            handshake_timeout: Duration::from_secs(10),
            max_receive_buffer_bytes: 1024,
        };
        let (_conn, mut events) = GatewayConnection::spawn(server, config, crypto::random_secret);

        client.write_all(&vec![0xAAu8; 2048]).await.unwrap();

        let event = events.recv().await.unwrap();
        match event {
            ConnectionEvent::Closed { reason } => assert!(reason.contains("overflow")),
            other => panic!("expected Closed event, got {other:?}"),
        }
    }
}
