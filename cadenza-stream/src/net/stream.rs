//! Dedicated audio stream channel server
//!
//! A second, minimal WebSocket listener that carries only outbound audio.
//! Control traffic stays on the main channel; a client that wants the
//! low-latency path connects here, authenticates with the stream token from
//! its `hello` message, and from then on receives binary frames written
//! straight from the session's pending-frame slot.

use crate::error::{Error, Result};
use crate::net::control::AppContext;
use crate::net::sink::DedicatedChannel;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cadenza_common::protocol::StreamClientMessage;
use cadenza_common::ServerMessage;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time allowed for the client to present its token.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the stream server until the task is dropped.
pub async fn run(ctx: AppContext, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/stream", get(ws_handler))
        .with_state(ctx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting stream server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("cannot bind to {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Server(format!("stream server error: {}", e)))
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_socket(socket, ctx))
}

async fn stream_socket(mut socket: WebSocket, ctx: AppContext) {
    debug!("Stream connection opened");

    // One-time auth handshake; anything else closes the connection.
    let first = match tokio::time::timeout(AUTH_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            warn!("Stream connection: expected auth message");
            return;
        }
        Err(_) => {
            warn!("Stream connection: auth timeout");
            return;
        }
    };

    let token = match serde_json::from_str::<StreamClientMessage>(&first) {
        Ok(StreamClientMessage::Auth { token }) => token,
        Err(e) => {
            warn!("Stream connection: invalid auth message: {}", e);
            return;
        }
    };

    let Some(session) = ctx.registry.lookup(&token) else {
        warn!("Stream connection: invalid token");
        let reply = ServerMessage::AuthFailed {
            reason: "invalid_token".to_string(),
        };
        if let Ok(text) = serde_json::to_string(&reply) {
            let _ = socket.send(Message::Text(text)).await;
        }
        return;
    };

    if let Ok(text) = serde_json::to_string(&ServerMessage::AuthOk) {
        if socket.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    // Attach: the worker now writes into this channel's single slot and the
    // loop below puts each claimed frame on the wire.
    let channel = DedicatedChannel::new();
    session.sink.attach(channel.clone());
    info!("Stream channel attached");

    loop {
        tokio::select! {
            frame = channel.wait_frame() => {
                let sent = socket.send(Message::Binary(frame)).await;
                channel.write_complete();
                if sent.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // No client traffic is expected after auth; close on
                // anything terminal and ignore the rest.
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        }
    }

    session.sink.detach();
    info!("Stream channel detached");
}
