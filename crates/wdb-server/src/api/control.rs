//! Control WebSocket.
//!
//! Every open tab holds one of these. It carries the session list, the
//! breakpoint list, process enumeration and the administrative verbs; all
//! state-change notifications from the registries fan out here.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use wdb_protocol::{Breakpoint, message};

use super::{AppState, OUTBOUND_BUFFER};
use crate::monitor;
use crate::state::{Hub, WsHandle, WsPayload};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_control(socket, state))
}

async fn handle_control(socket: WebSocket, state: AppState) {
    let uuid = Uuid::new_v4().to_string();
    info!("control websocket opened as {uuid}");

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (sender, mut receiver) = socket.split();
    let writer = tokio::spawn(write_loop(sender, rx));

    state.hub.control.add(&uuid, Arc::new(WsHandle::new(tx))).await;

    // Without a watcher the UI has to drive process refreshes itself.
    if !state.watcher_available
        && let Err(err) = state.hub.control.send(&uuid, "StartLoop", None).await
    {
        warn!("failed to send StartLoop to {uuid}: {err:#}");
    }

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_command(&state, &uuid, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("control websocket error for {uuid}: {err}");
                break;
            }
        }
    }

    info!("control websocket closed for {uuid}");
    state.hub.control.remove(&uuid).await;
    writer.abort();
}

async fn write_loop(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<WsPayload>,
) {
    while let Some(payload) = rx.recv().await {
        match payload {
            WsPayload::Text(text) => {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            WsPayload::Close => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn handle_command(state: &AppState, uuid: &str, raw: &str) {
    debug!("control {uuid} -> {raw}");
    let hub = &state.hub;
    let (cmd, data) = message::split(raw);
    match cmd {
        "ListSockets" => {
            for socket_uuid in hub.sockets.uuids() {
                let filename = if hub.settings.show_filename() {
                    hub.sockets.get_filename(&socket_uuid)
                } else {
                    String::new()
                };
                let payload = json!({ "uuid": socket_uuid, "filename": filename });
                reply(hub, uuid, "AddSocket", Some(&payload)).await;
            }
        }
        "ListWebsockets" => {
            for ws_uuid in hub.websockets.uuids() {
                reply(hub, uuid, "AddWebSocket", Some(&Value::String(ws_uuid))).await;
            }
        }
        "ListBreaks" => {
            for brk in hub.breakpoints.get().await {
                reply(hub, uuid, "AddBreak", Some(&brk.to_value())).await;
            }
        }
        "RemoveBreak" => match Breakpoint::parse(data) {
            Ok(mut brk) => {
                // Stored breakpoints never carry the temporary key.
                brk.strip_temporary();
                hub.breakpoints.remove(&brk).await;
                brk.set_temporary(false);
                hub.sockets.broadcast("Unbreak", Some(&brk.to_value())).await;
            }
            Err(err) => warn!("unparseable RemoveBreak payload: {err}"),
        },
        "RemoveUUID" => {
            hub.sockets.close(data).await;
            hub.sockets.remove(data).await;
            hub.websockets.close(data).await;
            hub.websockets.remove(data).await;
        }
        "ListProcesses" => {
            monitor::refresh_processes(&hub.control, Some(uuid), state.inspector.as_ref()).await;
        }
        "Pause" => match data.parse::<u32>() {
            Ok(pid) if pid == std::process::id() => {
                debug!("pausing self");
                state.engine.self_shell();
            }
            Ok(pid) => {
                debug!("pausing {pid}");
                state.engine.attach(pid);
            }
            Err(err) => warn!("Pause with invalid pid {data:?}: {err}"),
        },
        "RunFile" => state.engine.run_file(data),
        "RunShell" => state.engine.run_shell(),
        other => warn!("unknown control command {other:?}"),
    }
}

async fn reply(hub: &Hub, uuid: &str, data: &str, payload: Option<&Value>) {
    if let Err(err) = hub.control.send(uuid, data, payload).await {
        warn!("failed to send {data} to control {uuid}: {err:#}");
    }
}
