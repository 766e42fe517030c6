//! Control channel server
//!
//! One WebSocket endpoint carries all JSON control traffic: subscribe,
//! playback control, search, and queue edits. Each connection owns at most
//! one playback session, created lazily on the first subscribe/control/queue
//! message and torn down (worker joined, resources released) when the
//! connection closes.
//!
//! Control handlers run on the connection task; operations that join the
//! worker thread are pushed through `spawn_blocking` so the I/O runtime
//! never blocks on a decode in flight.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::library::{MediaIndex, PathGuard};
use crate::net::outbound::{Outbound, OutboundQueue};
use crate::net::registry::SessionRegistry;
use crate::playback::session::{Session, MAX_QUEUE};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cadenza_common::protocol::{
    ClientMessage, ControlAction, ControlPayload, ParseError, QueueAction, QueuePayload,
    SearchPayload, SubscribePayload,
};
use cadenza_common::{ErrorCode, ServerMessage, Track};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default and maximum search result limits.
const DEFAULT_SEARCH_LIMIT: usize = 50;
const MAX_SEARCH_LIMIT: usize = 200;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub index: Arc<dyn MediaIndex>,
    pub guard: Arc<PathGuard>,
    pub registry: Arc<SessionRegistry>,
}

/// Build the control router.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the control server until the task is dropped.
pub async fn run(ctx: AppContext, port: u16) -> Result<()> {
    let app = router(ctx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting control server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("cannot bind to {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Server(format!("control server error: {}", e)))
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Per-connection state: the outbound queue, the stream-channel token, and
/// the lazily created session.
struct Connection {
    ctx: AppContext,
    outbound: OutboundQueue,
    stream_token: Uuid,
    session: Option<Arc<Session>>,
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound, mut outbound_rx) = OutboundQueue::new();

    let session_id = Uuid::new_v4();
    let stream_token = Uuid::new_v4();
    info!("Control connection opened: session {}", session_id);

    // Writer task: the only place that touches the socket's send half.
    // Background threads queue; this task drains.
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            let message = match item {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!("Cannot serialize outbound message: {}", e);
                        continue;
                    }
                },
                Outbound::Audio(frame) => Message::Binary(frame),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    outbound.send_message(ServerMessage::Hello {
        session_id,
        stream_token,
        stream_port: ctx.config.stream_port(),
    });

    let mut conn = Connection {
        ctx: ctx.clone(),
        outbound,
        stream_token,
        session: None,
    };

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => conn.handle_text(&text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Connection gone: unregister the stream token first so no new
    // dedicated channel can attach, then join the worker and release the
    // pipeline.
    ctx.registry.deregister(&stream_token);
    if let Some(session) = conn.session.take() {
        let _ = tokio::task::spawn_blocking(move || session.teardown()).await;
    }
    writer.abort();
    info!("Control connection closed: session {}", session_id);
}

impl Connection {
    async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(ParseError::UnknownType(kind)) => {
                self.reply_error(ErrorCode::InvalidRequest, format!("unknown message type: {kind}"));
                return;
            }
            Err(e) => {
                debug!("Malformed control message: {:?}", e);
                self.reply_error(ErrorCode::InvalidRequest, "malformed message");
                return;
            }
        };

        match message {
            ClientMessage::Subscribe(payload) => self.handle_subscribe(payload).await,
            ClientMessage::Unsubscribe => self.handle_unsubscribe().await,
            ClientMessage::Control(payload) => self.handle_control(payload).await,
            ClientMessage::Search(payload) => self.handle_search(payload),
            ClientMessage::Queue(payload) => self.handle_queue(payload).await,
        }
    }

    fn reply_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.outbound.send_message(ServerMessage::error(code, message));
    }

    /// Map internal errors to wire error codes.
    fn reply_failure(&self, err: &Error) {
        let (code, message) = match err {
            Error::PathOutsideRoot(_) => (ErrorCode::InvalidPath, "Path not in media library".to_string()),
            Error::IndexOutOfRange(_) => (ErrorCode::InvalidIndex, "Index out of range".to_string()),
            Error::NotFound(what) => (ErrorCode::NotFound, what.clone()),
            other => (ErrorCode::PlaybackError, other.to_string()),
        };
        self.reply_error(code, message);
    }

    /// Get or lazily create this connection's session.
    fn ensure_session(&mut self) -> Option<Arc<Session>> {
        if let Some(session) = &self.session {
            return Some(Arc::clone(session));
        }
        let streaming = &self.ctx.config.streaming;
        match Session::new(
            streaming.default_quality,
            streaming.bitrate_mode,
            self.outbound.clone(),
        ) {
            Ok(session) => {
                self.ctx
                    .registry
                    .register(self.stream_token, Arc::clone(&session));
                self.session = Some(Arc::clone(&session));
                Some(session)
            }
            Err(e) => {
                error!("Cannot initialize session: {}", e);
                self.reply_error(ErrorCode::InitError, "Failed to initialize session");
                None
            }
        }
    }

    /// Run a blocking session operation off the I/O runtime.
    async fn blocking<T, F>(&self, session: Arc<Session>, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Session>) -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || op(session))
            .await
            .map_err(|e| Error::Playback(format!("control task failed: {}", e)))?
    }

    // ========================================
    // Message handlers
    // ========================================

    async fn handle_subscribe(&mut self, payload: SubscribePayload) {
        if !self.ctx.config.streaming.enabled {
            self.reply_error(ErrorCode::Unavailable, "Music streaming is not available");
            return;
        }
        let Some(session) = self.ensure_session() else {
            return;
        };
        session.set_encoder_prefs(payload.quality, payload.bitrate_mode);
        session.send_state();
        info!("Client subscribed");
    }

    async fn handle_unsubscribe(&mut self) {
        if let Some(session) = self.session.clone() {
            let _ = self
                .blocking(session, |s| {
                    s.stop_streaming();
                    Ok(())
                })
                .await;
            info!("Client unsubscribed");
        }
    }

    async fn handle_control(&mut self, payload: ControlPayload) {
        let Some(action) = ControlAction::parse(&payload.action) else {
            self.reply_error(ErrorCode::UnknownAction, "Unknown control action");
            return;
        };
        let Some(session) = self.ensure_session() else {
            return;
        };
        debug!("Control action '{}'", payload.action);

        let result = match action {
            ControlAction::Play => self.control_play(&session, &payload).await,
            ControlAction::Pause => {
                session.pause();
                Ok(())
            }
            ControlAction::Stop => {
                self.blocking(Arc::clone(&session), |s| {
                    s.stop();
                    Ok(())
                })
                .await
            }
            ControlAction::Next => self
                .blocking(Arc::clone(&session), |s| s.next().map(|_| ()))
                .await,
            ControlAction::Previous => self
                .blocking(Arc::clone(&session), |s| s.previous().map(|_| ()))
                .await,
            ControlAction::Seek => match payload.position_sec {
                Some(position_sec) => {
                    self.blocking(Arc::clone(&session), move |s| s.seek(position_sec))
                        .await
                }
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing position_sec");
                    return;
                }
            },
            ControlAction::PlayIndex => match payload.index {
                Some(index) => {
                    self.blocking(Arc::clone(&session), move |s| s.play_index(index))
                        .await
                }
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing index");
                    return;
                }
            },
            ControlAction::AddToQueue => match payload.path.as_deref() {
                Some(path) => self.add_path_to_queue(&session, path),
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing path");
                    return;
                }
            },
            ControlAction::RemoveFromQueue => match payload.index {
                Some(index) => {
                    self.blocking(Arc::clone(&session), move |s| s.remove_track(index))
                        .await
                }
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing index");
                    return;
                }
            },
            ControlAction::ClearQueue => {
                self.blocking(Arc::clone(&session), |s| {
                    s.clear_queue();
                    Ok(())
                })
                .await
            }
            ControlAction::AddArtist => match payload.artist.as_deref() {
                Some(artist) => {
                    let tracks = self.ctx.index.tracks_by_artist(artist, MAX_QUEUE);
                    let added = session.add_tracks(tracks);
                    info!("Added {} tracks by '{}' to queue", added, artist);
                    Ok(())
                }
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing artist");
                    return;
                }
            },
            ControlAction::AddAlbum => match payload.album.as_deref() {
                Some(album) => {
                    let tracks = self.ctx.index.tracks_by_album(album, MAX_QUEUE);
                    let added = session.add_tracks(tracks);
                    info!("Added {} tracks from album '{}' to queue", added, album);
                    Ok(())
                }
                None => {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing album");
                    return;
                }
            },
        };

        match result {
            Ok(()) => session.send_state(),
            Err(e) => {
                self.reply_failure(&e);
                // The failure may have changed state (e.g. stopped playback).
                session.send_state();
            }
        }
    }

    /// `play` with a path, a search query, or neither (resume).
    async fn control_play(&self, session: &Arc<Session>, payload: &ControlPayload) -> Result<()> {
        if let Some(path) = payload.path.as_deref() {
            let track = self.resolve_path(path)?;
            return self
                .blocking(Arc::clone(session), move |s| s.play_track_front(track))
                .await;
        }

        if let Some(query) = payload.query.as_deref() {
            let results = self.ctx.index.search(query, MAX_QUEUE);
            if results.is_empty() {
                return Err(Error::NotFound("No music found matching query".to_string()));
            }
            return self
                .blocking(Arc::clone(session), move |s| s.play_tracks(results))
                .await;
        }

        // Bare play resumes a paused session; otherwise just report state.
        session.resume();
        Ok(())
    }

    /// Validate a client path and look up its metadata, falling back to
    /// filename-only metadata for files the index has not (re)scanned.
    fn resolve_path(&self, path: &str) -> Result<Track> {
        let canonical = self.ctx.guard.validate(Path::new(path))?;
        Ok(self
            .ctx
            .index
            .get_by_path(&canonical)
            .unwrap_or_else(|| Track::untagged(&canonical)))
    }

    fn add_path_to_queue(&self, session: &Arc<Session>, path: &str) -> Result<()> {
        let track = self.resolve_path(path)?;
        if !session.add_track(track) {
            warn!("Queue full, dropping add_to_queue");
        }
        Ok(())
    }

    fn handle_search(&mut self, payload: SearchPayload) {
        let limit = match payload.limit {
            Some(limit) if limit > 0 && limit <= MAX_SEARCH_LIMIT => limit,
            _ => DEFAULT_SEARCH_LIMIT,
        };
        let results = self.ctx.index.search(&payload.query, limit);
        self.outbound.send_message(ServerMessage::SearchResults {
            query: payload.query,
            count: results.len(),
            results,
        });
    }

    async fn handle_queue(&mut self, payload: QueuePayload) {
        let Some(action) = QueueAction::parse(&payload.action) else {
            self.reply_error(ErrorCode::UnknownAction, "Unknown queue action");
            return;
        };
        let Some(session) = self.ensure_session() else {
            return;
        };

        match action {
            QueueAction::List => {
                let (queue, current_index) = session.queue_view();
                let length = queue.len();
                self.outbound.send_message(ServerMessage::QueueList {
                    queue,
                    current_index,
                    length,
                });
            }
            QueueAction::Add => {
                let Some(path) = payload.path.as_deref() else {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing path");
                    return;
                };
                // Queue adds require indexed tracks; unknown files are a
                // NOT_FOUND, unlike play-by-path which tolerates them.
                let result = self.ctx.guard.validate(Path::new(path)).and_then(|p| {
                    self.ctx
                        .index
                        .get_by_path(&p)
                        .ok_or_else(|| Error::NotFound("Track not found in library".to_string()))
                });
                match result {
                    Ok(track) => {
                        session.add_track(track);
                        session.send_state();
                    }
                    Err(e) => self.reply_failure(&e),
                }
            }
            QueueAction::Remove => {
                let Some(index) = payload.index else {
                    self.reply_error(ErrorCode::InvalidRequest, "Missing index");
                    return;
                };
                match self
                    .blocking(Arc::clone(&session), move |s| s.remove_track(index))
                    .await
                {
                    Ok(()) => session.send_state(),
                    Err(e) => self.reply_failure(&e),
                }
            }
            QueueAction::Clear => {
                let _ = self
                    .blocking(Arc::clone(&session), |s| {
                        s.clear_queue();
                        Ok(())
                    })
                    .await;
                session.send_state();
            }
        }
    }
}
