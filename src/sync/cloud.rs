//! Cloud backend: room records in the realtime database with a live event stream

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::RoomSnapshot;
use crate::room::RoomId;
use crate::store::{RealtimeDbClient, RealtimeDbError};

use super::{ChannelError, ChannelEvent, ReplicationChannel, Subscription};

const BACKEND: &str = "cloud";

/// Publishes to `rooms/<id>` and streams changes back over server-sent events
#[derive(Clone, Debug)]
pub struct CloudChannel {
    db: RealtimeDbClient,
}

impl CloudChannel {
    pub fn new(db: RealtimeDbClient) -> Self {
        Self { db }
    }

    fn path(room: &RoomId) -> String {
        format!("rooms/{}", room)
    }
}

fn read_error(e: impl ToString) -> ChannelError {
    ChannelError::Read {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

#[async_trait]
impl ReplicationChannel for CloudChannel {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn publish(&self, room: &RoomId, snapshot: &RoomSnapshot) -> Result<(), ChannelError> {
        self.db
            .put(&Self::path(room), snapshot)
            .await
            .map_err(|e| ChannelError::Write {
                backend: BACKEND,
                reason: e.to_string(),
            })
    }

    async fn fetch(&self, room: &RoomId) -> Result<Option<RoomSnapshot>, ChannelError> {
        self.db.get(&Self::path(room)).await.map_err(read_error)
    }

    fn subscribe(&self, room: &RoomId, events: mpsc::Sender<ChannelEvent>) -> Subscription {
        let db = self.db.clone();
        let room = room.clone();

        Subscription::new(tokio::spawn(async move {
            info!(room_id = %room, "Cloud subscription opened");
            // No reconnect: the mirror poll keeps the spectator fed if this drops.
            if let Err(e) = listen(&db, &room, &events).await {
                warn!(room_id = %room, error = %e, "Cloud subscription ended");
                let _ = events.send(ChannelEvent::Warning(e)).await;
            }
        }))
    }
}

/// Payload of `put`/`patch` events
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: serde_json::Value,
}

/// What the listener does with one stream event
#[derive(Debug, PartialEq)]
enum StreamStep {
    Deliver(RoomSnapshot),
    /// Partial update: read the whole record back
    Refetch,
    Skip,
    /// Undecodable payload; reported, the stream stays open
    Malformed(String),
    /// Server ended the stream
    Close(String),
}

fn interpret(event: &SseEvent) -> StreamStep {
    match event.name.as_str() {
        "put" | "patch" => {
            let payload: StreamPayload = match serde_json::from_str(&event.data) {
                Ok(payload) => payload,
                Err(e) => return StreamStep::Malformed(format!("{} event: {}", event.name, e)),
            };
            if event.name == "patch" || payload.path != "/" {
                return StreamStep::Refetch;
            }
            if payload.data.is_null() {
                return StreamStep::Skip;
            }
            match serde_json::from_value::<RoomSnapshot>(payload.data) {
                Ok(snapshot) => StreamStep::Deliver(snapshot),
                Err(e) => StreamStep::Malformed(format!("room record: {}", e)),
            }
        }
        "cancel" | "auth_revoked" => {
            StreamStep::Close(format!("stream {}: {}", event.name, event.data))
        }
        _ => StreamStep::Skip,
    }
}

/// Pump the event stream until it fails or the subscriber goes away
async fn listen(
    db: &RealtimeDbClient,
    room: &RoomId,
    events: &mpsc::Sender<ChannelEvent>,
) -> Result<(), ChannelError> {
    let path = CloudChannel::path(room);
    let response = db.listen(&path).await.map_err(read_error)?;
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| read_error(RealtimeDbError::Request(e)))?;

        for event in decoder.feed(&chunk) {
            let delivery = match interpret(&event) {
                StreamStep::Deliver(snapshot) => ChannelEvent::Snapshot {
                    source: BACKEND,
                    snapshot,
                },
                StreamStep::Refetch => match db.get::<RoomSnapshot>(&path).await {
                    Ok(Some(snapshot)) => ChannelEvent::Snapshot {
                        source: BACKEND,
                        snapshot,
                    },
                    Ok(None) => continue,
                    Err(e) => ChannelEvent::Warning(read_error(e)),
                },
                StreamStep::Skip => {
                    debug!(room_id = %room, event = %event.name, "Nothing to apply");
                    continue;
                }
                StreamStep::Malformed(reason) => {
                    warn!(room_id = %room, error = %reason, "Skipping undecodable stream event");
                    ChannelEvent::Warning(read_error(reason))
                }
                StreamStep::Close(reason) => return Err(read_error(reason)),
            };

            if events.send(delivery).await.is_err() {
                return Ok(());
            }
        }
    }

    Err(read_error("stream closed by server"))
}

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    name: String,
    data: String,
}

/// Incremental `text/event-stream` line decoder
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');

            if line.is_empty() {
                out.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let name = self.event.take();
        if name.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            name: name.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
