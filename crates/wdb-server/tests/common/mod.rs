//! Shared harness: a real hub with ephemeral HTTP and TCP listeners, plus
//! small wire-level client helpers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wdb_protocol::frame;
use wdb_server::api::{self, AppState};
use wdb_server::config::EngineConfig;
use wdb_server::engine::Engine;
use wdb_server::monitor::ProcfsInspector;
use wdb_server::state::{Hub, Settings};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub http_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    pub hub: Hub,
    pub settings: Arc<Settings>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(Arc::new(Settings::default())).await
}

pub async fn spawn_app_with(settings: Arc<Settings>) -> TestApp {
    let hub = Hub::new(settings.clone());
    let state = AppState {
        hub: hub.clone(),
        engine: Engine::new(EngineConfig::default()),
        inspector: Arc::new(ProcfsInspector::new()),
        watcher_available: false,
    };
    let router = api::create_router(state);

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(http_listener, router).await.unwrap();
    });

    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_addr = tcp_listener.local_addr().unwrap();
    let tcp_hub = hub.clone();
    tokio::spawn(async move {
        wdb_server::tcp::run(tcp_listener, tcp_hub).await.unwrap();
    });

    TestApp {
        http_addr,
        tcp_addr,
        hub,
        settings,
    }
}

impl TestApp {
    /// Connect a debuggee and register it, waiting until the hub has it.
    pub async fn connect_debuggee(&self, uuid: &str) -> TcpStream {
        let mut stream = TcpStream::connect(self.tcp_addr).await.unwrap();
        frame::write_frame(&mut stream, uuid).await.unwrap();
        let sockets = self.hub.sockets.clone();
        let uuid = uuid.to_string();
        wait_for(move || sockets.contains(&uuid)).await;
        stream
    }

    pub async fn connect_relay(&self, uuid: &str) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{}/websocket/{uuid}", self.http_addr))
            .await
            .unwrap();
        ws
    }

    /// Connect a control channel. The harness runs without a library
    /// watcher, so the first message is always the polling hint.
    pub async fn connect_control(&self) -> WsClient {
        let (mut ws, _) = connect_async(format!("ws://{}/status", self.http_addr))
            .await
            .unwrap();
        assert_eq!(recv_text(&mut ws).await, "StartLoop");
        ws
    }
}

pub async fn recv_text(ws: &mut WsClient) -> String {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return text.to_string(),
            Ok(Some(Ok(_))) => continue,
            other => panic!("websocket ended while waiting for text: {other:?}"),
        }
    }
}

/// The next event must be the server closing the connection.
pub async fn expect_close(ws: &mut WsClient) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return,
            Ok(Some(Ok(other))) => panic!("expected close, got {other:?}"),
            other => panic!("websocket error while waiting for close: {other:?}"),
        }
    }
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
