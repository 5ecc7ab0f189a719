use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ptt_core::clock::{Clock, SystemClock};
use ptt_core::events::{ClientFrame, ServerEvent};
use ptt_core::fanout::ListenerSink;
use ptt_core::ids::{ChannelId, DeviceToken};

use crate::state::AppState;

/// Adapts an `axum` WebSocket's write half to the core's [`ListenerSink`].
/// The Fan-out Engine's per-listener writer task is the only caller of
/// `send_text`/`close` for a given socket, but the lock still protects
/// against the final `close` racing a last in-flight `send_text`.
pub struct WsListenerSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsListenerSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink: Mutex::new(sink) }
    }
}

#[async_trait]
impl ListenerSink for WsListenerSink {
    async fn send_text(&self, payload: String) -> Result<(), ()> {
        self.sink.lock().await.send(Message::Text(payload.into())).await.map_err(|_| ())
    }

    async fn close(&self, code: &'static str) {
        let mut sink = self.sink.lock().await;
        let _ = sink
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 4000,
                reason: code.into(),
            })))
            .await;
        let _ = sink.close().await;
    }
}

#[derive(Deserialize)]
pub struct StreamQuery {
    device_token: String,
}

/// `GET /channels/:uuid/stream` — upgrades to a WebSocket carrying the
/// §6.4 JSON frames. The device must already hold a registry entry from a
/// prior REST `join`; this call only attaches the socket.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let channel_uuid = ChannelId::new(uuid);
    let device_token = DeviceToken::new(query.device_token);

    ws.on_upgrade(move |socket| async move {
        handle_socket(state, channel_uuid, device_token, socket).await;
    })
}

async fn handle_socket(
    state: Arc<AppState>,
    channel_uuid: ChannelId,
    device_token: DeviceToken,
    socket: WebSocket,
) {
    state.gateway_metrics.conn_accepted();
    let (write, mut read) = socket.split();

    let coordinator = match state.router.resolve(&channel_uuid).await {
        Ok(c) => c,
        Err(e) => {
            warn!(channel_uuid = %channel_uuid, error = %e, "stream: unresolvable channel");
            state.gateway_metrics.conn_closed();
            return;
        }
    };

    let sink: Arc<dyn ListenerSink> = Arc::new(WsListenerSink::new(write));
    if let Err(e) = coordinator.attach_socket(device_token.clone(), sink.clone()).await {
        warn!(device_token = %device_token, error = %e, "stream: attach failed");
        state.gateway_metrics.conn_closed();
        return;
    }
    info!(channel_uuid = %channel_uuid, device_token = %device_token, "socket attached");

    // A socket that stops pinging (but never sends Close or errors) is
    // otherwise invisible to the much slower idle-participant sweep; the
    // heartbeat timeout (3x the configured interval, per §5) closes it
    // proactively instead.
    let heartbeat_timeout = state.cfg.heartbeat_interval() * 3;

    loop {
        let next = match tokio::time::timeout(heartbeat_timeout, read.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_elapsed) => {
                warn!(channel_uuid = %channel_uuid, device_token = %device_token, "stream: missed heartbeat, closing");
                send_error(&sink, "slow_consumer", "missed heartbeat").await;
                break;
            }
        };

        match next {
            Message::Text(text) => {
                coordinator.touch(device_token.clone());
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Ping { .. }) => {
                        state.gateway_metrics.control_msg_rx("ping");
                        coordinator.pong(device_token.clone());
                        state.gateway_metrics.control_msg_tx("pong");
                    }
                    Ok(ClientFrame::Leave) => {
                        state.gateway_metrics.control_msg_rx("leave");
                        let _ = coordinator.leave(device_token.clone()).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "stream: malformed inbound frame");
                        send_error(&sink, "invalid_chunk", "malformed frame").await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    coordinator.detach_socket(device_token);
    state.gateway_metrics.conn_closed();
}

/// Replies directly to this socket with a §6.4 `error` frame, bypassing
/// the Fan-out Engine's broadcast path since the failure is specific to
/// the one socket that sent the bad frame (§4.H, §7).
async fn send_error(sink: &Arc<dyn ListenerSink>, code: &'static str, message: &str) {
    let frame = ServerEvent::Error {
        error: message.to_string(),
        code: Some(code),
        timestamp: SystemClock.now_ms(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = sink.send_text(json).await;
    }
}
