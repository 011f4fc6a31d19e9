//! Room replication: one publish/subscribe interface, several backends

pub mod cloud;
pub mod fanout;
pub mod mirror;

#[cfg(test)]
pub mod memory;

pub use cloud::CloudChannel;
pub use fanout::FanoutChannel;
pub use mirror::MirrorChannel;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::game::RoomSnapshot;
use crate::room::RoomId;

/// Fan-out publish/subscribe of whole room snapshots, keyed by room id
#[async_trait]
pub trait ReplicationChannel: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Overwrite the room record with `snapshot`
    async fn publish(&self, room: &RoomId, snapshot: &RoomSnapshot) -> Result<(), ChannelError>;

    /// One-shot read of the room record
    async fn fetch(&self, room: &RoomId) -> Result<Option<RoomSnapshot>, ChannelError>;

    /// Start delivering snapshots for `room` into `events` until the
    /// returned subscription is dropped
    fn subscribe(&self, room: &RoomId, events: mpsc::Sender<ChannelEvent>) -> Subscription;
}

/// Delivered to subscribers
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Snapshot {
        source: &'static str,
        snapshot: RoomSnapshot,
    },
    /// Non-fatal delivery problem, e.g. a dropped live stream
    Warning(ChannelError),
}

/// Replication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("{backend} write failed: {reason}")]
    Write {
        backend: &'static str,
        reason: String,
    },

    #[error("{backend} read failed: {reason}")]
    Read {
        backend: &'static str,
        reason: String,
    },
}

/// Background delivery tasks. Dropping or cancelling aborts all of them at once.
#[derive(Debug, Default)]
pub struct Subscription {
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { tasks: vec![task] }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn merge(&mut self, mut other: Subscription) {
        self.tasks.append(&mut other.tasks);
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
