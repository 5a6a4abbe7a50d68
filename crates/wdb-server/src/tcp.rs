//! Debuggee TCP listener.
//!
//! Each connection starts with a registration frame carrying the session
//! UUID, then settles into a frame loop: a few verbs are handled by the hub
//! itself and everything else is relayed verbatim to the session's browser.

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use wdb_protocol::frame::{self, FrameError, REGISTRATION_UUID_LEN};

use crate::state::{Hub, TcpHandle};

pub async fn run(listener: TcpListener, hub: Hub) -> Result<()> {
    loop {
        let (stream, addr) = listener
            .accept()
            .await
            .context("accepting debuggee connection")?;
        info!("connection received from {addr}");
        let hub = hub.clone();
        tokio::spawn(handle_connection(stream, hub));
    }
}

async fn handle_connection(stream: TcpStream, hub: Hub) {
    let (mut reader, writer) = stream.into_split();

    let uuid = match read_registration(&mut reader).await {
        Ok(uuid) => uuid,
        Err(err) => {
            warn!("closed stream during registration: {err:#}");
            return;
        }
    };

    debug!("assigning stream to {uuid}");
    hub.sockets.add(&uuid, Arc::new(TcpHandle::new(writer))).await;

    match read_loop(&mut reader, &uuid, &hub).await {
        Err(FrameError::Eof) => info!("uuid {uuid} closed"),
        Err(err) => warn!("closed stream for {uuid}: {err}"),
        Ok(()) => {}
    }
    teardown(&uuid, &hub).await;
}

/// The first frame must be exactly a hyphenated UUID; anything else kills
/// the connection before it is registered.
async fn read_registration<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = frame::read_length(reader).await?;
    ensure!(
        len == REGISTRATION_UUID_LEN,
        "registration frame of {len} bytes, expected {REGISTRATION_UUID_LEN}"
    );
    let text = frame::read_body(reader, len).await?;
    let uuid = Uuid::parse_str(&text).context("registration payload is not a uuid")?;
    Ok(uuid.to_string())
}

async fn read_loop<R>(reader: &mut R, uuid: &str, hub: &Hub) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = frame::read_frame(reader).await?;
        debug!("socket -> websocket: {frame}");
        dispatch(uuid, &frame, hub).await;
    }
}

async fn dispatch(uuid: &str, frame: &str, hub: &Hub) {
    if frame == "ServerBreaks" {
        let breaks = hub.breakpoints.as_json().await.to_string();
        if let Err(err) = hub.sockets.send(uuid, &breaks, None).await {
            warn!("failed to answer ServerBreaks for {uuid}: {err:#}");
        }
    } else if frame == "PING" {
        info!("{uuid} PONG");
    } else if let Some(filename) = frame.strip_prefix("UPDATE_FILENAME|") {
        hub.sockets.set_filename(uuid, filename).await;
    } else if let Err(err) = hub.websockets.send(uuid, frame, None).await {
        warn!("failed to relay frame for {uuid}: {err:#}");
    }
}

/// The debuggee is gone: tell its browser to die, then drop both registry
/// entries.
async fn teardown(uuid: &str, hub: &Hub) {
    if hub.websockets.contains(uuid) {
        if let Err(err) = hub.websockets.send(uuid, "Die", None).await {
            warn!("failed to notify websocket of {uuid} closing: {err:#}");
        }
        hub.websockets.close(uuid).await;
        hub.websockets.remove(uuid).await;
    }
    hub.sockets.close(uuid).await;
    hub.sockets.remove(uuid).await;
}
