//! Per-session relay WebSocket.
//!
//! One browser tab per session: a newly attached tab takes over from any
//! previous one. Inbound messages go to the session's debuggee (or to all
//! debuggees with the `Broadcast|` prefix); outbound traffic is forwarded
//! verbatim, with `BreakSet`/`BreakUnset` additionally folded into the
//! shared breakpoint store on the way through.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use wdb_protocol::Breakpoint;

use super::{AppState, OUTBOUND_BUFFER};
use crate::state::{ConnectionHandle, Hub, WsHandle, WsPayload};

pub async fn ws_handler(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, uuid, state.hub))
}

async fn handle_session(socket: WebSocket, uuid: String, hub: Hub) {
    if hub.websockets.contains(&uuid) {
        warn!("websocket already opened for {uuid}, closing previous one");
        if let Err(err) = hub.websockets.send(&uuid, "Die", None).await {
            warn!("failed to kill previous websocket for {uuid}: {err:#}");
        }
        hub.websockets.close(&uuid).await;
    }

    if !hub.sockets.contains(&uuid) {
        warn!("websocket opened for {uuid} with no corresponding socket");
        if let Err(err) = hub.sockets.send(&uuid, "Die", None).await {
            warn!("failed to send Die for {uuid}: {err:#}");
        }
        reject(socket).await;
        return;
    }

    info!("websocket opened for {uuid}");

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (sender, mut receiver) = socket.split();
    let writer = tokio::spawn(write_loop(sender, rx, hub.clone()));

    let handle: Arc<dyn ConnectionHandle> = Arc::new(WsHandle::new(tx));
    hub.websockets.add(&uuid, handle.clone()).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => on_message(&hub, &uuid, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("websocket error for {uuid}: {err}");
                break;
            }
        }
    }

    info!("websocket closed for {uuid}");
    // The registry entry is not dropped here: closing the debuggee tears the
    // whole session down, which reaps it. In detached mode the entry lingers
    // until a new tab takes the session over. A tab that was displaced by a
    // takeover no longer owns the session and must not close its debuggee.
    let still_owner = hub
        .websockets
        .get(&uuid)
        .is_some_and(|current| Arc::ptr_eq(&current, &handle));
    if still_owner && !hub.settings.detached_session() {
        if let Err(err) = hub.sockets.send(&uuid, "Close", None).await {
            warn!("failed to close socket for {uuid}: {err:#}");
        }
        hub.sockets.close(&uuid).await;
    }
    writer.abort();
}

/// Tell an unregistered browser to die and close it.
async fn reject(mut socket: WebSocket) {
    let _ = socket.send(Message::Text("Die".into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Owns the socket's write half. Everything the hub addresses to this
/// session funnels through here, which is where outbound breakpoint traffic
/// gets intercepted.
async fn write_loop(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<WsPayload>,
    hub: Hub,
) {
    while let Some(payload) = rx.recv().await {
        match payload {
            WsPayload::Text(text) => {
                intercept_breaks(&hub, &text).await;
                debug!("websocket <- {text}");
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

/// Keep the shared store in sync with breakpoint traffic travelling to the
/// browser. Temporary breakpoints pass through untouched and unstored; the
/// rest are persisted with the `temporary` key stripped. The forwarded
/// message is never modified.
async fn intercept_breaks(hub: &Hub, text: &str) {
    let Some((cmd, data)) = text.split_once('|') else {
        return;
    };
    if cmd != "BreakSet" && cmd != "BreakUnset" {
        return;
    }
    let mut brk = match Breakpoint::parse(data) {
        Ok(brk) => brk,
        Err(err) => {
            warn!("unparseable breakpoint in {cmd}: {err}");
            return;
        }
    };
    if brk.is_temporary() {
        return;
    }
    brk.strip_temporary();
    match cmd {
        "BreakSet" => hub.breakpoints.add(brk).await,
        _ => hub.breakpoints.remove(&brk).await,
    }
}

async fn on_message(hub: &Hub, uuid: &str, message: &str) {
    debug!("websocket -> socket: {message}");
    if let Some(rest) = message.strip_prefix("Broadcast|") {
        hub.sockets.broadcast(rest, None).await;
    } else if let Err(err) = hub.sockets.send(uuid, message, None).await {
        warn!("failed to forward message to {uuid}: {err:#}");
    }
}
