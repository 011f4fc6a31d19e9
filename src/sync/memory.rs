//! In-process channel used by tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::game::{MatchState, RoomSnapshot};
use crate::room::RoomId;

use super::{ChannelError, ChannelEvent, ReplicationChannel, Subscription};

/// Shared record map plus a live feed, standing in for a remote database
pub struct MemoryChannel {
    records: Mutex<HashMap<RoomId, RoomSnapshot>>,
    feed: broadcast::Sender<(RoomId, ChannelEvent)>,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    every_room_taken: AtomicBool,
    publishes: AtomicUsize,
    fetches: AtomicUsize,
    /// Held by a test to keep `fetch` pending
    pub fetch_gate: tokio::sync::Mutex<()>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            records: Mutex::new(HashMap::new()),
            feed,
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            every_room_taken: AtomicBool::new(false),
            publishes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            fetch_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// `publish` never resolves while set
    pub fn stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// `fetch` answers with a record for any room while set
    pub fn take_every_room(&self, taken: bool) {
        self.every_room_taken.store(taken, Ordering::SeqCst);
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn record(&self, room: &RoomId) -> Option<RoomSnapshot> {
        self.records.lock().unwrap().get(room).cloned()
    }

    pub fn seed(&self, room: &RoomId, snapshot: RoomSnapshot) {
        self.records.lock().unwrap().insert(room.clone(), snapshot);
    }

    /// Deliver a read failure to the room's subscribers
    pub fn report(&self, room: &RoomId, error: ChannelError) {
        let _ = self.feed.send((room.clone(), ChannelEvent::Warning(error)));
    }

    /// Live subscribers currently attached
    pub fn listeners(&self) -> usize {
        self.feed.receiver_count()
    }
}

#[async_trait]
impl ReplicationChannel for MemoryChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, room: &RoomId, snapshot: &RoomSnapshot) -> Result<(), ChannelError> {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::Write {
                backend: "memory",
                reason: "offline".to_string(),
            });
        }
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.seed(room, snapshot.clone());
        let event = ChannelEvent::Snapshot {
            source: "memory",
            snapshot: snapshot.clone(),
        };
        let _ = self.feed.send((room.clone(), event));
        Ok(())
    }

    async fn fetch(&self, room: &RoomId) -> Result<Option<RoomSnapshot>, ChannelError> {
        let _gate = self.fetch_gate.lock().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.every_room_taken.load(Ordering::SeqCst) {
            return Ok(Some(RoomSnapshot::capture(&MatchState::new())));
        }
        Ok(self.record(room))
    }

    fn subscribe(&self, room: &RoomId, events: mpsc::Sender<ChannelEvent>) -> Subscription {
        let mut feed = self.feed.subscribe();
        let initial = self.record(room);
        let room = room.clone();

        Subscription::new(tokio::spawn(async move {
            if let Some(snapshot) = initial {
                let _ = events
                    .send(ChannelEvent::Snapshot {
                        source: "memory",
                        snapshot,
                    })
                    .await;
            }
            while let Ok((target, event)) = feed.recv().await {
                if target != room {
                    continue;
                }
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }))
    }
}
