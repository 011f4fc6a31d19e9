//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::room::RoomSession;
use crate::store::{LocalStore, PersistenceStore, RealtimeDbClient, StoreError};
use crate::sync::{CloudChannel, FanoutChannel, MirrorChannel, ReplicationChannel};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: Arc<RoomSession>,
    /// Replication backends in use, for health output
    pub backends: Vec<&'static str>,
}

impl AppState {
    /// Open local storage, wire the replication backends and resume the
    /// previous session
    pub async fn build(config: Config) -> Result<Self, StoreError> {
        let config = Arc::new(config);

        // Initialize stores
        let store = PersistenceStore::new(LocalStore::open(&config.data_dir)?);
        let mirror_store = LocalStore::open(&config.mirror_dir)?;

        // Initialize replication
        let mut fanout = FanoutChannel::new();
        match &config.cloud {
            Some(cloud) => {
                info!(database_url = %cloud.database_url, "Cloud replication enabled");
                fanout = fanout.with(Arc::new(CloudChannel::new(RealtimeDbClient::new(cloud))));
            }
            None => info!("CLOUD_DATABASE_URL not set, replicating through the local mirror only"),
        }
        fanout = fanout.with(Arc::new(MirrorChannel::new(
            mirror_store,
            config.mirror_poll_interval,
        )));
        let backends = fanout.backend_names();

        let channel: Arc<dyn ReplicationChannel> = Arc::new(fanout);
        let session = RoomSession::resume(channel, store, config.push_timeout).await;

        Ok(Self {
            config,
            session,
            backends,
        })
    }
}
