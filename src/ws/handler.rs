//! WebSocket upgrade handler: pushes session views to a connected UI

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::room::RoomSession;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Replies owed to this client only (pong, refresh)
const REPLY_BUFFER: usize = 16;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| handle_socket(socket, connection_id, state.session))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, connection_id: Uuid, session: Arc<RoomSession>) {
    info!(connection_id = %connection_id, "UI connected");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before reading the view so no change slips in between
    let updates = session.subscribe_updates();

    let welcome = ServerMsg::Welcome {
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send welcome");
        return;
    }
    if let Err(e) = send_msg(&mut ws_sink, &ServerMsg::view(session.view().await)).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send initial view");
        return;
    }

    run_session(connection_id, session, ws_sink, ws_stream, updates).await;

    info!(connection_id = %connection_id, "UI disconnected");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: Uuid,
    session: Arc<RoomSession>,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut updates: broadcast::Receiver<ServerMsg>,
) {
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(REPLY_BUFFER);

    // Writer task: session updates and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                update = updates.recv() => match update {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Views are whole; the next one catches the UI up
                        warn!(connection_id = %connection_id, lagged_count = n, "UI lagged behind session updates");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(connection_id = %connection_id, "Update channel closed");
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: UI -> replies
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Ping { t }) => ServerMsg::Pong { t },
                    Ok(ClientMsg::Refresh) => ServerMsg::view(session.view().await),
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };
                if reply_tx.send(reply).await.is_err() {
                    debug!(connection_id = %connection_id, "Writer gone");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
