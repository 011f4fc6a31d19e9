//! Fan-out over several replication backends

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::RoomSnapshot;
use crate::room::RoomId;

use super::{ChannelError, ChannelEvent, ReplicationChannel, Subscription};

/// Presents any number of backends as one channel.
///
/// Publishing writes to every backend; one failing never stops the others.
/// Subscribers receive events from all backends on the same sender.
#[derive(Clone, Default)]
pub struct FanoutChannel {
    backends: Vec<Arc<dyn ReplicationChannel>>,
}

impl FanoutChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn ReplicationChannel>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

#[async_trait]
impl ReplicationChannel for FanoutChannel {
    fn name(&self) -> &'static str {
        "fanout"
    }

    /// Fails only when every backend failed
    async fn publish(&self, room: &RoomId, snapshot: &RoomSnapshot) -> Result<(), ChannelError> {
        let results = join_all(self.backends.iter().map(|b| b.publish(room, snapshot))).await;

        let mut first_error = None;
        let mut delivered = 0;
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(room_id = %room, backend = backend.name(), error = %e, "Publish failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(room_id = %room, delivered, "Snapshot published");
        match first_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }

    /// Newest snapshot any backend holds
    async fn fetch(&self, room: &RoomId) -> Result<Option<RoomSnapshot>, ChannelError> {
        let results = join_all(self.backends.iter().map(|b| b.fetch(room))).await;

        let mut newest: Option<RoomSnapshot> = None;
        let mut first_error = None;
        let mut answered = 0;
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(found) => {
                    answered += 1;
                    if let Some(snapshot) = found {
                        let is_newer = newest
                            .as_ref()
                            .map_or(true, |n| snapshot.last_updated > n.last_updated);
                        if is_newer {
                            newest = Some(snapshot);
                        }
                    }
                }
                Err(e) => {
                    warn!(room_id = %room, backend = backend.name(), error = %e, "Fetch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(newest),
        }
    }

    fn subscribe(&self, room: &RoomId, events: mpsc::Sender<ChannelEvent>) -> Subscription {
        let mut subscription = Subscription::empty();
        for backend in &self.backends {
            subscription.merge(backend.subscribe(room, events.clone()));
        }
        subscription
    }
}
