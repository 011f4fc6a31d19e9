//! Local-mirror backend: room snapshots in a machine-local record, polled by spectators

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::RoomSnapshot;
use crate::room::RoomId;
use crate::store::LocalStore;

use super::{ChannelError, ChannelEvent, ReplicationChannel, Subscription};

const BACKEND: &str = "mirror";

/// Writes snapshots to a local record; subscribers poll it on a fixed period
#[derive(Clone, Debug)]
pub struct MirrorChannel {
    store: LocalStore,
    poll_interval: Duration,
}

impl MirrorChannel {
    pub fn new(store: LocalStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    fn key(room: &RoomId) -> String {
        format!("room_mirror_{}", room)
    }
}

#[async_trait]
impl ReplicationChannel for MirrorChannel {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn publish(&self, room: &RoomId, snapshot: &RoomSnapshot) -> Result<(), ChannelError> {
        self.store
            .put(&Self::key(room), snapshot)
            .map_err(|e| ChannelError::Write {
                backend: BACKEND,
                reason: e.to_string(),
            })
    }

    async fn fetch(&self, room: &RoomId) -> Result<Option<RoomSnapshot>, ChannelError> {
        self.store
            .get(&Self::key(room))
            .map_err(|e| ChannelError::Read {
                backend: BACKEND,
                reason: e.to_string(),
            })
    }

    fn subscribe(&self, room: &RoomId, events: mpsc::Sender<ChannelEvent>) -> Subscription {
        let store = self.store.clone();
        let key = Self::key(room);
        let period = self.poll_interval;
        let room = room.clone();

        Subscription::new(tokio::spawn(async move {
            info!(room_id = %room, period_ms = period.as_millis() as u64, "Mirror polling started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_seen: Option<DateTime<Utc>> = None;

            loop {
                ticker.tick().await;

                let snapshot = match store.get::<RoomSnapshot>(&key) {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(room_id = %room, error = %e, "Mirror record unreadable");
                        continue;
                    }
                };

                if last_seen == Some(snapshot.last_updated) {
                    continue;
                }
                last_seen = Some(snapshot.last_updated);

                let event = ChannelEvent::Snapshot {
                    source: BACKEND,
                    snapshot,
                };
                if events.send(event).await.is_err() {
                    debug!(room_id = %room, "Mirror subscriber gone");
                    break;
                }
            }
        }))
    }
}
