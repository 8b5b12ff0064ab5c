//! Per-connection WebSocket plumbing.
//!
//! Each accepted socket gets a reader task (frames in, commands routed)
//! and a writer task (outbound queue drained to the socket, periodic
//! keepalive pings). The reader ending, for any reason, tears the client
//! down.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::watcher::{build_file_tree, read_claude_config};
use crate::ws::types::{
    self, validate_client_message, ClaudeConfigPayload, ClientCommand, FilesTreePayload,
    ERR_INVALID_MESSAGE,
};

/// GET /ws, upgrading to the realtime protocol.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let (client_id, outbound) = state.hub.register_client();
    info!(client = client_id, "realtime client connected");

    // Current session list first, then attach to every live session so
    // this client sees responses for sessions that predate it.
    state.hub.send_session_list(client_id).await;
    state.hub.subscribe_to_active_sessions(client_id).await;

    let realtime = &state.config.realtime;
    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        Duration::from_secs(realtime.ping_interval_secs),
        Duration::from_secs(realtime.write_deadline_secs),
    ));

    read_pump(
        stream,
        &state,
        client_id,
        Duration::from_secs(realtime.read_deadline_secs),
    )
    .await;

    writer.abort();
    state.hub.unregister_client(client_id).await;
    info!(client = client_id, "realtime client disconnected");
}

/// Drain the outbound queue into the socket, pinging every
/// `ping_interval`. Every socket write is bounded by `write_deadline`.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    ping_interval: Duration,
    write_deadline: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        match timeout(write_deadline, sink.send(Message::Text(text.into()))).await {
                            Ok(Ok(())) => {}
                            _ => break,
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match timeout(write_deadline, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}

/// Read frames until the socket closes, errors, or misses the read
/// deadline. Any inbound frame (pong included) refreshes the deadline.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    client_id: u64,
    read_deadline: Duration,
) {
    loop {
        let frame = match timeout(read_deadline, stream.next()).await {
            Err(_) => {
                debug!(client = client_id, "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(client = client_id, error = %err, "websocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_client_message(state, client_id, text.as_str()).await,
            Message::Close(_) => break,
            // Pings are answered by axum; pongs only refresh the deadline.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

async fn handle_client_message(state: &AppState, client_id: u64, raw: &str) {
    let command = match validate_client_message(raw) {
        Ok(command) => command,
        Err(err) => {
            state
                .hub
                .send_error(client_id, ERR_INVALID_MESSAGE, &err.to_string());
            return;
        }
    };

    match command {
        ClientCommand::CreateSession { work_dir, label } => {
            match state.manager.create(&work_dir, &label).await {
                Ok(session) => state.announce_session(&session).await,
                Err(err) => {
                    state
                        .hub
                        .send_error(client_id, err.wire_code(), &err.to_string());
                }
            }
        }

        ClientCommand::SendPrompt { session_id, prompt } => {
            if let Err(err) = state.manager.send_prompt(&session_id, &prompt).await {
                state
                    .hub
                    .send_error(client_id, err.wire_code(), &err.to_string());
            }
        }

        ClientCommand::KillSession { session_id } => {
            if let Err(err) = state.manager.kill(&session_id).await {
                state
                    .hub
                    .send_error(client_id, err.wire_code(), &err.to_string());
            }
        }

        ClientCommand::RequestTree { session_id } => {
            let work_dir = match state.manager.work_dir(&session_id).await {
                Ok(dir) => dir,
                Err(err) => {
                    state
                        .hub
                        .send_error(client_id, err.wire_code(), &err.to_string());
                    return;
                }
            };

            let depth = state.config.watcher.tree_depth;
            let tree = match tokio::task::spawn_blocking(move || {
                build_file_tree(std::path::Path::new(&work_dir), depth)
            })
            .await
            {
                Ok(tree) => tree,
                Err(err) => {
                    warn!(session = %session_id, error = %err, "tree snapshot task failed");
                    return;
                }
            };

            state.hub.send_payload(
                client_id,
                types::TYPE_FILES_TREE,
                &FilesTreePayload { session_id, tree },
            );
        }

        ClientCommand::RequestConfig { session_id } => {
            let work_dir = match state.manager.work_dir(&session_id).await {
                Ok(dir) => dir,
                Err(err) => {
                    state
                        .hub
                        .send_error(client_id, err.wire_code(), &err.to_string());
                    return;
                }
            };

            let files = match tokio::task::spawn_blocking(move || {
                read_claude_config(std::path::Path::new(&work_dir))
            })
            .await
            {
                Ok(files) => files,
                Err(err) => {
                    warn!(session = %session_id, error = %err, "config snapshot task failed");
                    return;
                }
            };

            state.hub.send_payload(
                client_id,
                types::TYPE_CLAUDE_CONFIG,
                &ClaudeConfigPayload { session_id, files },
            );
        }
    }
}
