//! Keyed connection registries.
//!
//! Each registry maps a session UUID to one live connection handle. All
//! three kinds share the same core: unicast `send`, broadcast with eviction
//! of handles that fail mid-send, replace-on-re-add, and `Remove<Kind>`
//! notifications fanned out to the control channels whenever an entry is
//! actually evicted.

use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};

use wdb_protocol::{frame, message};

use super::Settings;

/// One live peer connection, independent of transport.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Deliver one text payload to the peer.
    async fn send_text(&self, data: &str) -> Result<()>;

    /// Close the underlying transport. Idempotent; failures are logged, not
    /// surfaced.
    async fn close(&self);
}

/// Debuggee connection: a locked TCP write half speaking length-prefixed
/// frames.
pub struct TcpHandle {
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpHandle {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl ConnectionHandle for TcpHandle {
    async fn send_text(&self, data: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, data).await?;
        Ok(())
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            warn!("failed to close socket: {err}");
        }
    }
}

/// Item on a WebSocket writer channel.
pub enum WsPayload {
    Text(String),
    Close,
}

/// Browser connection: a channel to the writer task that owns the socket.
/// A closed channel means the tab is gone and the registry entry just has
/// not been reaped yet; sends are logged and dropped, not failed.
pub struct WsHandle {
    tx: mpsc::Sender<WsPayload>,
}

impl WsHandle {
    pub fn new(tx: mpsc::Sender<WsPayload>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ConnectionHandle for WsHandle {
    async fn send_text(&self, data: &str) -> Result<()> {
        if self.tx.send(WsPayload::Text(data.to_string())).await.is_err() {
            warn!("websocket is closed");
        }
        Ok(())
    }

    async fn close(&self) {
        let _ = self.tx.send(WsPayload::Close).await;
    }
}

/// Shared core of the three registries.
struct RegistryCore {
    kind: &'static str,
    entries: DashMap<String, Arc<dyn ConnectionHandle>>,
    control: Weak<ControlRegistry>,
}

impl RegistryCore {
    fn new(kind: &'static str, control: Weak<ControlRegistry>) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
            control,
        }
    }

    fn get(&self, uuid: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.entries.get(uuid).map(|entry| entry.value().clone())
    }

    fn contains(&self, uuid: &str) -> bool {
        self.entries.contains_key(uuid)
    }

    fn uuids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn send(&self, uuid: &str, data: &str, payload: Option<&Value>) -> Result<()> {
        match self.get(uuid) {
            Some(handle) => handle.send_text(&message::join(data, payload)).await,
            None => {
                warn!("no {} found for {uuid}", self.kind);
                Ok(())
            }
        }
    }

    /// Deliver to every registered connection. A handle that fails mid-send
    /// is closed and evicted; the rest still receive the message. An
    /// eviction re-enters `broadcast` through the control registry's removal
    /// notice, so the future is boxed to close the recursive call cycle.
    fn broadcast<'a>(&'a self, data: &'a str, payload: Option<&'a Value>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for uuid in self.uuids() {
                debug!("broadcast to {} {uuid}", self.kind);
                if let Err(err) = self.send(&uuid, data, payload).await {
                    warn!("failed broadcast to {} {uuid}: {err:#}", self.kind);
                    self.close(&uuid).await;
                    self.remove(&uuid).await;
                }
            }
        })
    }

    /// Register a handle, replacing and closing any previous one for the
    /// same session.
    async fn add(&self, uuid: &str, handle: Arc<dyn ConnectionHandle>) {
        if let Some((_, old)) = self.entries.remove(uuid) {
            self.notify_removed(uuid).await;
            old.close().await;
        }
        self.entries.insert(uuid.to_string(), handle);
    }

    async fn remove(&self, uuid: &str) {
        if self.entries.remove(uuid).is_some() {
            self.notify_removed(uuid).await;
        }
    }

    async fn notify_removed(&self, uuid: &str) {
        if let Some(control) = self.control.upgrade() {
            let verb = format!("Remove{}", self.kind);
            control
                .broadcast(&verb, Some(&Value::String(uuid.to_string())))
                .await;
        }
    }

    async fn close(&self, uuid: &str) {
        if let Some(handle) = self.get(uuid) {
            handle.close().await;
        }
    }
}

/// Registry of debuggee TCP connections, plus the last filename each one
/// reported. Filenames are stored unconditionally; `show_filename` only
/// gates what leaves the server.
pub struct DebuggeeRegistry {
    core: RegistryCore,
    filenames: DashMap<String, String>,
    settings: Arc<Settings>,
}

impl DebuggeeRegistry {
    pub fn new(control: &Arc<ControlRegistry>, settings: Arc<Settings>) -> Self {
        Self {
            core: RegistryCore::new("Socket", Arc::downgrade(control)),
            filenames: DashMap::new(),
            settings,
        }
    }

    pub async fn add(&self, uuid: &str, handle: Arc<dyn ConnectionHandle>) {
        self.core.add(uuid, handle).await;
        if let Some(control) = self.core.control.upgrade() {
            control
                .broadcast("AddSocket", Some(&json!({ "uuid": uuid })))
                .await;
        }
    }

    pub async fn remove(&self, uuid: &str) {
        self.core.remove(uuid).await;
        self.filenames.remove(uuid);
    }

    pub async fn send(&self, uuid: &str, data: &str, payload: Option<&Value>) -> Result<()> {
        self.core.send(uuid, data, payload).await
    }

    pub async fn broadcast(&self, data: &str, payload: Option<&Value>) {
        self.core.broadcast(data, payload).await;
    }

    pub async fn close(&self, uuid: &str) {
        self.core.close(uuid).await;
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.core.contains(uuid)
    }

    pub fn uuids(&self) -> Vec<String> {
        self.core.uuids()
    }

    pub fn get_filename(&self, uuid: &str) -> String {
        self.filenames
            .get(uuid)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Record the filename the debuggee is currently running and re-announce
    /// the session, with the name blanked when `show_filename` is off.
    pub async fn set_filename(&self, uuid: &str, filename: &str) {
        self.filenames
            .insert(uuid.to_string(), filename.to_string());
        let shown = if self.settings.show_filename() {
            filename
        } else {
            ""
        };
        if let Some(control) = self.core.control.upgrade() {
            control
                .broadcast(
                    "AddSocket",
                    Some(&json!({ "uuid": uuid, "filename": shown })),
                )
                .await;
        }
    }
}

/// Registry of per-session browser relay WebSockets.
pub struct UiRegistry {
    core: RegistryCore,
}

impl UiRegistry {
    pub fn new(control: &Arc<ControlRegistry>) -> Self {
        Self {
            core: RegistryCore::new("WebSocket", Arc::downgrade(control)),
        }
    }

    pub async fn add(&self, uuid: &str, handle: Arc<dyn ConnectionHandle>) {
        self.core.add(uuid, handle).await;
        if let Some(control) = self.core.control.upgrade() {
            control
                .broadcast("AddWebSocket", Some(&Value::String(uuid.to_string())))
                .await;
        }
    }

    pub async fn remove(&self, uuid: &str) {
        self.core.remove(uuid).await;
    }

    pub async fn send(&self, uuid: &str, data: &str, payload: Option<&Value>) -> Result<()> {
        self.core.send(uuid, data, payload).await
    }

    pub async fn close(&self, uuid: &str) {
        self.core.close(uuid).await;
    }

    pub fn get(&self, uuid: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.core.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.core.contains(uuid)
    }

    pub fn uuids(&self) -> Vec<String> {
        self.core.uuids()
    }
}

/// Registry of control WebSockets. It receives the add/remove notifications
/// of every registry, its own included.
pub struct ControlRegistry {
    core: RegistryCore,
}

impl ControlRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            core: RegistryCore::new("SyncWebSocket", weak.clone()),
        })
    }

    pub async fn add(&self, uuid: &str, handle: Arc<dyn ConnectionHandle>) {
        self.core.add(uuid, handle).await;
    }

    pub async fn remove(&self, uuid: &str) {
        self.core.remove(uuid).await;
    }

    pub async fn send(&self, uuid: &str, data: &str, payload: Option<&Value>) -> Result<()> {
        self.core.send(uuid, data, payload).await
    }

    pub async fn broadcast(&self, data: &str, payload: Option<&Value>) {
        self.core.broadcast(data, payload).await;
    }

    pub async fn close(&self, uuid: &str) {
        self.core.close(uuid).await;
    }

    pub fn uuids(&self) -> Vec<String> {
        self.core.uuids()
    }
}
