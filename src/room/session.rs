//! Room session: binds the match to a room and a role, and drives replication

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{
    CellPosition, ConfirmError, ConfirmationGate, GameError, MatchPhase, MatchState, MoveRecord,
    PendingAction, PendingPrompt, PlayerEntry, RoomSnapshot, ScoreCellValue, Standing,
};
use crate::store::{DisplayPreference, PersistenceStore, Role, RoomIdentity};
use crate::sync::{ChannelError, ChannelEvent, ReplicationChannel, Subscription};
use crate::ws::protocol::ServerMsg;

use super::id::{InvalidRoomId, RoomId};

/// Room ids drawn before giving up on finding an unused one
const MAX_ROOM_ID_DRAWS: usize = 5;
const UPDATE_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 32;

/// Replication state of this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not in a room
    #[default]
    Local,
    /// Waiting for the first snapshot (spectator join, host reconnect)
    Syncing,
    Live,
}

/// Everything a UI needs to render
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: MatchPhase,
    pub players: Vec<PlayerEntry>,
    pub active_index: usize,
    pub instant_winner: Option<String>,
    pub move_log: Vec<MoveRecord>,
    pub standings: Vec<Standing>,
    pub winner: Option<String>,
    pub setup_names: Vec<String>,
    pub room: Option<RoomIdentity>,
    pub sync: SyncStatus,
    pub read_only: bool,
    pub pending: Option<PendingPrompt>,
    pub preference: DisplayPreference,
}

/// Result of a UI command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied,
    /// Held by the confirmation gate until accepted
    AwaitingConfirmation { prompt: PendingPrompt },
    /// Spectators are read-only
    Ignored,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Confirm(#[from] ConfirmError),

    #[error(transparent)]
    InvalidRoomId(#[from] InvalidRoomId),

    #[error("Already in room {0}")]
    AlreadyInRoom(RoomId),

    #[error("Not in a room")]
    NotInRoom,

    #[error("No room join in progress")]
    NotJoining,
}

#[derive(Default)]
struct SessionInner {
    state: MatchState,
    room: Option<RoomIdentity>,
    sync: SyncStatus,
    gate: ConfirmationGate,
    preference: DisplayPreference,
    /// Live subscription (spectator) or pending reconnect fetch (host)
    subscription: Option<Subscription>,
    /// Bumped on every room change; results tagged with an older epoch are dropped
    epoch: u64,
}

impl SessionInner {
    fn is_spectator(&self) -> bool {
        matches!(&self.room, Some(r) if r.role == Role::Spectator)
    }

    fn view(&self) -> SessionView {
        SessionView {
            phase: self.state.phase,
            players: self.state.players.clone(),
            active_index: self.state.active_index,
            instant_winner: self.state.instant_winner.clone(),
            move_log: self.state.move_log.clone(),
            standings: self.state.standings(),
            winner: self.state.winner(),
            setup_names: self.state.setup_names.clone(),
            room: self.room.clone(),
            sync: self.sync,
            read_only: self.is_spectator(),
            pending: self.gate.pending().cloned(),
            preference: self.preference,
        }
    }
}

/// The device's match plus its optional room role.
///
/// All commands take the same lock, so one UI event is fully applied
/// (state, log, persistence, replication) before the next one starts.
pub struct RoomSession {
    inner: Mutex<SessionInner>,
    channel: Arc<dyn ReplicationChannel>,
    store: PersistenceStore,
    updates: broadcast::Sender<ServerMsg>,
    /// Longest a command waits on a room push before reporting it as failed
    push_timeout: Duration,
}

impl RoomSession {
    pub fn new(
        channel: Arc<dyn ReplicationChannel>,
        store: PersistenceStore,
        push_timeout: Duration,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Arc::new(Self {
            inner: Mutex::new(SessionInner::default()),
            channel,
            store,
            updates,
            push_timeout,
        })
    }

    /// Restore what the previous run left behind. A stored room identity
    /// takes precedence over the stored match.
    pub async fn resume(
        channel: Arc<dyn ReplicationChannel>,
        store: PersistenceStore,
        push_timeout: Duration,
    ) -> Arc<Self> {
        let session = Self::new(channel, store, push_timeout);
        {
            let mut inner = session.inner.lock().await;
            inner.preference = session.store.load_preference();

            match session.store.load_room() {
                None => {
                    inner.state = session.store.load_match();
                    debug!(players = inner.state.players.len(), "Resumed local match");
                }
                Some(RoomIdentity {
                    room_id,
                    role: Role::Spectator,
                }) => {
                    info!(room_id = %room_id, "Rejoining room as spectator");
                    session.attach_spectator(&mut inner, room_id);
                }
                Some(RoomIdentity {
                    room_id,
                    role: Role::Host,
                }) => {
                    inner.state = session.store.load_match();
                    inner.room = Some(RoomIdentity {
                        room_id: room_id.clone(),
                        role: Role::Host,
                    });

                    if inner.state.has_players() {
                        info!(room_id = %room_id, "Resuming hosted room from local match");
                        inner.sync = SyncStatus::Live;
                        session.push(&room_id, &inner.state).await;
                    } else {
                        // Pushing the empty local state now would wipe the room
                        info!(room_id = %room_id, "Fetching hosted room before pushing");
                        inner.sync = SyncStatus::Syncing;
                        let epoch = inner.epoch;
                        inner.subscription = Some(session.spawn_reconnect(room_id, epoch));
                    }
                }
            }
        }
        session
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ServerMsg> {
        self.updates.subscribe()
    }

    pub async fn view(&self) -> SessionView {
        self.inner.lock().await.view()
    }

    // ------------------------------------------------------------------
    // Match commands
    // ------------------------------------------------------------------

    pub async fn start_match(&self, names: &[String]) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.is_spectator() {
            return Ok(Self::ignored("start_match"));
        }
        inner.state.start(names)?;
        self.commit(&inner).await;
        Ok(CommandOutcome::Applied)
    }

    /// Score a cell. The instant-win marker is held for confirmation first.
    pub async fn set_cell(
        &self,
        player_index: usize,
        position: CellPosition,
        value: ScoreCellValue,
    ) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.is_spectator() {
            return Ok(Self::ignored("set_cell"));
        }

        if value == ScoreCellValue::InstantWin {
            inner.state.check_cell(player_index, position, value)?;
            let name = inner
                .state
                .players
                .get(player_index)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let prompt = inner.gate.submit(
                PendingAction::DeclareInstantWin {
                    player_index,
                    position,
                },
                format!("Declare an instant win for {name}? The match ends immediately."),
            );
            self.broadcast(&inner);
            return Ok(CommandOutcome::AwaitingConfirmation { prompt });
        }

        inner.state.set_cell(player_index, position, value)?;
        self.commit(&inner).await;
        Ok(CommandOutcome::Applied)
    }

    pub async fn set_active_index(&self, index: usize) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.is_spectator() {
            return Ok(Self::ignored("set_active_index"));
        }
        inner.state.set_active_index(index)?;
        self.commit(&inner).await;
        Ok(CommandOutcome::Applied)
    }

    pub async fn request_finish(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.is_spectator() {
            return Ok(Self::ignored("finish"));
        }
        if inner.state.phase != MatchPhase::Playing {
            return Err(GameError::WrongPhase {
                expected: MatchPhase::Playing,
                actual: inner.state.phase,
            }
            .into());
        }
        let prompt = inner.gate.submit(
            PendingAction::FinishManually,
            "Finish the match and show the results?",
        );
        self.broadcast(&inner);
        Ok(CommandOutcome::AwaitingConfirmation { prompt })
    }

    pub async fn request_reset(&self, preserve_names: bool) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.is_spectator() {
            return Ok(Self::ignored("reset"));
        }
        let prompt = inner.gate.submit(
            PendingAction::HardReset { preserve_names },
            "Clear everything and start a new match?",
        );
        self.broadcast(&inner);
        Ok(CommandOutcome::AwaitingConfirmation { prompt })
    }

    pub async fn request_leave(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        let room_id = match &inner.room {
            Some(identity) => identity.room_id.clone(),
            None => return Err(SessionError::NotInRoom),
        };
        let prompt = inner
            .gate
            .submit(PendingAction::LeaveRoom, format!("Leave room {room_id}?"));
        self.broadcast(&inner);
        Ok(CommandOutcome::AwaitingConfirmation { prompt })
    }

    /// Run the pending action
    pub async fn confirm(&self, id: Uuid) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        let action = inner.gate.accept(id)?;
        info!(?action, "Action confirmed");

        let applied = match action {
            PendingAction::DeclareInstantWin {
                player_index,
                position,
            } => inner
                .state
                .set_cell(player_index, position, ScoreCellValue::InstantWin)
                .map(drop),
            PendingAction::FinishManually => inner.state.finish_manually(),
            PendingAction::HardReset { preserve_names } => {
                self.reset_now(&mut inner, preserve_names);
                return Ok(CommandOutcome::Applied);
            }
            PendingAction::LeaveRoom => {
                self.leave_now(&mut inner);
                return Ok(CommandOutcome::Applied);
            }
        };

        match applied {
            Ok(()) => {
                self.commit(&inner).await;
                Ok(CommandOutcome::Applied)
            }
            Err(e) => {
                // The prompt is gone either way
                self.broadcast(&inner);
                Err(e.into())
            }
        }
    }

    /// Drop the pending action; nothing else changes
    pub async fn cancel(&self, id: Uuid) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let action = inner.gate.reject(id)?;
        debug!(?action, "Action cancelled");
        self.broadcast(&inner);
        Ok(())
    }

    pub async fn update_preference(&self, preference: DisplayPreference) {
        let mut inner = self.inner.lock().await;
        inner.preference = preference;
        if let Err(e) = self.store.save_preference(&preference) {
            warn!(error = %e, "Failed to persist display preference");
        }
        self.broadcast(&inner);
    }

    pub async fn preference(&self) -> DisplayPreference {
        self.inner.lock().await.preference
    }

    // ------------------------------------------------------------------
    // Room commands
    // ------------------------------------------------------------------

    /// Become the host of a new room and push the current match to it
    pub async fn host_room(&self) -> Result<RoomId, SessionError> {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = &inner.room {
            return Err(SessionError::AlreadyInRoom(identity.room_id.clone()));
        }

        let room_id = self.draw_room_id().await;
        let identity = RoomIdentity {
            room_id: room_id.clone(),
            role: Role::Host,
        };
        if let Err(e) = self.store.save_room(&identity) {
            warn!(room_id = %room_id, error = %e, "Failed to persist room identity");
        }

        inner.epoch += 1;
        inner.room = Some(identity);
        inner.sync = SyncStatus::Live;
        info!(room_id = %room_id, "Hosting room");

        self.commit(&inner).await;
        Ok(room_id)
    }

    /// Start mirroring someone else's room
    pub async fn join_room(self: &Arc<Self>, code: &str) -> Result<(), SessionError> {
        let room_id = RoomId::parse(code)?;
        let mut inner = self.inner.lock().await;
        if let Some(identity) = &inner.room {
            return Err(SessionError::AlreadyInRoom(identity.room_id.clone()));
        }

        info!(room_id = %room_id, "Joining room as spectator");
        self.attach_spectator(&mut inner, room_id);
        self.broadcast(&inner);
        Ok(())
    }

    /// Abandon a join that has not received anything yet
    pub async fn cancel_join(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if !(inner.is_spectator() && inner.sync == SyncStatus::Syncing) {
            return Err(SessionError::NotJoining);
        }
        self.leave_now(&mut inner);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ignored(command: &str) -> CommandOutcome {
        debug!(command, "Spectator is read-only, ignoring command");
        CommandOutcome::Ignored
    }

    /// Write-through after every committed mutation: persist, notify UIs,
    /// then push when hosting. UIs see the change whatever the push does.
    async fn commit(&self, inner: &SessionInner) {
        if !inner.is_spectator() {
            self.persist(inner);
        }
        self.broadcast(inner);

        if let Some(RoomIdentity {
            room_id,
            role: Role::Host,
        }) = &inner.room
        {
            if inner.sync == SyncStatus::Syncing {
                debug!(room_id = %room_id, "Room fetch pending, push suppressed");
            } else {
                self.push(room_id, &inner.state).await;
            }
        }
    }

    fn persist(&self, inner: &SessionInner) {
        if let Err(e) = self.store.save_match(&inner.state) {
            warn!(error = %e, "Failed to persist match");
        }
    }

    /// A failed or stalled push never rolls back the host's state
    async fn push(&self, room_id: &RoomId, state: &MatchState) {
        let snapshot = RoomSnapshot::capture(state);
        let reason = match timeout(self.push_timeout, self.channel.publish(room_id, &snapshot)).await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "room push got no answer within {} ms",
                self.push_timeout.as_millis()
            ),
        };
        warn!(room_id = %room_id, error = %reason, "Room push failed");
        self.notify(ServerMsg::warning("channel_write", reason));
    }

    fn broadcast(&self, inner: &SessionInner) {
        self.notify(ServerMsg::view(inner.view()));
    }

    fn notify(&self, msg: ServerMsg) {
        // No receivers just means no UI is connected
        let _ = self.updates.send(msg);
    }

    async fn draw_room_id(&self) -> RoomId {
        let mut candidate = RoomId::generate();
        for draw in 1..=MAX_ROOM_ID_DRAWS {
            match timeout(self.push_timeout, self.channel.fetch(&candidate)).await {
                Ok(Ok(None)) => return candidate,
                Ok(Ok(Some(_))) => {
                    warn!(room_id = %candidate, draw, "Room id already in use");
                }
                Ok(Err(e)) => {
                    warn!(room_id = %candidate, error = %e, "Could not check room id, keeping it");
                    return candidate;
                }
                Err(_) => {
                    warn!(room_id = %candidate, "Room id check timed out, keeping it");
                    return candidate;
                }
            }
            if draw < MAX_ROOM_ID_DRAWS {
                candidate = RoomId::generate();
            }
        }
        warn!(
            room_id = %candidate,
            draws = MAX_ROOM_ID_DRAWS,
            "No free room id found, hosting on an id already in use"
        );
        candidate
    }

    fn attach_spectator(self: &Arc<Self>, inner: &mut SessionInner, room_id: RoomId) {
        if let Some(subscription) = inner.subscription.take() {
            subscription.cancel();
        }
        // Spectators own no match of their own
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear local match");
        }
        let identity = RoomIdentity {
            room_id: room_id.clone(),
            role: Role::Spectator,
        };
        if let Err(e) = self.store.save_room(&identity) {
            warn!(room_id = %room_id, error = %e, "Failed to persist room identity");
        }

        inner.epoch += 1;
        inner.state = MatchState::new();
        inner.gate.clear();
        inner.room = Some(identity);
        inner.sync = SyncStatus::Syncing;
        inner.subscription = Some(self.spawn_subscription(room_id, inner.epoch));
    }

    fn spawn_subscription(self: &Arc<Self>, room_id: RoomId, epoch: u64) -> Subscription {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut subscription = self.channel.subscribe(&room_id, tx);
        let session: Weak<Self> = Arc::downgrade(self);

        subscription.attach(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.on_channel_event(epoch, event).await;
            }
        }));
        subscription
    }

    /// Whole-snapshot replacement; the last snapshot to arrive wins
    async fn on_channel_event(&self, epoch: u64, event: ChannelEvent) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch || !inner.is_spectator() {
            debug!("Dropping event from a previous room");
            return;
        }

        match event {
            ChannelEvent::Snapshot { source, snapshot } => {
                if inner.sync == SyncStatus::Syncing {
                    info!(source, players = snapshot.player_count(), "Room synced");
                } else {
                    debug!(source, moves = snapshot.game.move_log.len(), "Applying room snapshot");
                }
                inner.state = snapshot.into_state();
                inner.sync = SyncStatus::Live;
                self.broadcast(&inner);
            }
            ChannelEvent::Warning(e) => {
                warn!(error = %e, "Room subscription problem");
                self.notify(ServerMsg::warning("channel_read", e.to_string()));
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, room_id: RoomId, epoch: u64) -> Subscription {
        let channel = self.channel.clone();
        let session: Weak<Self> = Arc::downgrade(self);

        Subscription::new(tokio::spawn(async move {
            let fetched = channel.fetch(&room_id).await;
            if let Some(session) = session.upgrade() {
                session.finish_reconnect(epoch, fetched).await;
            }
        }))
    }

    async fn finish_reconnect(
        &self,
        epoch: u64,
        fetched: Result<Option<RoomSnapshot>, ChannelError>,
    ) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.sync != SyncStatus::Syncing {
            return;
        }
        inner.sync = SyncStatus::Live;

        let restored = match fetched {
            Ok(Some(snapshot)) => {
                info!(players = snapshot.player_count(), "Restored hosted match from room");
                inner.state = snapshot.into_state();
                self.persist(&inner);
                true
            }
            Ok(None) => {
                info!("Hosted room holds no match");
                false
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch hosted room");
                self.notify(ServerMsg::warning("channel_read", e.to_string()));
                false
            }
        };

        // Anything started locally while waiting goes out now
        if !restored && inner.state.has_players() {
            if let Some(identity) = &inner.room {
                self.push(&identity.room_id, &inner.state).await;
            }
        }
        self.broadcast(&inner);
    }

    fn detach_room(&self, inner: &mut SessionInner) -> Option<RoomIdentity> {
        inner.epoch += 1;
        if let Some(subscription) = inner.subscription.take() {
            subscription.cancel();
        }
        inner.sync = SyncStatus::Local;
        let identity = inner.room.take()?;
        if let Err(e) = self.store.clear_room() {
            warn!(error = %e, "Failed to clear room identity");
        }
        Some(identity)
    }

    fn leave_now(&self, inner: &mut SessionInner) {
        let Some(identity) = self.detach_room(inner) else {
            return;
        };
        match identity.role {
            // A mirror is meaningless outside its room
            Role::Spectator => inner.state = MatchState::new(),
            // The host keeps playing locally
            Role::Host => self.persist(inner),
        }
        info!(room_id = %identity.room_id, role = ?identity.role, "Left room");
        self.broadcast(inner);
    }

    fn reset_now(&self, inner: &mut SessionInner, preserve_names: bool) {
        if let Some(identity) = self.detach_room(inner) {
            info!(room_id = %identity.room_id, "Left room on reset");
        }
        inner.state.hard_reset(preserve_names);
        inner.gate.clear();
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear session records");
        }
        self.broadcast(inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use crate::sync::memory::MemoryChannel;
    use tempfile::TempDir;
    use tokio::time::sleep;

    const PUSH_TIMEOUT: Duration = Duration::from_millis(200);

    fn store(dir: &TempDir) -> PersistenceStore {
        PersistenceStore::new(LocalStore::open(dir.path()).unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    async fn wait_for<F>(session: &RoomSession, check: F) -> SessionView
    where
        F: Fn(&SessionView) -> bool,
    {
        timeout(Duration::from_secs(2), async {
            loop {
                let view = session.view().await;
                if check(&view) {
                    return view;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session never reached the expected view")
    }

    fn prompt_id(outcome: CommandOutcome) -> Uuid {
        match outcome {
            CommandOutcome::AwaitingConfirmation { prompt } => prompt.id,
            other => panic!("expected a confirmation prompt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spectator_mirrors_the_hosts_pushes() {
        let (host_dir, spectator_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&host_dir), PUSH_TIMEOUT);
        let spectator = RoomSession::new(channel.clone(), store(&spectator_dir), PUSH_TIMEOUT);

        host.start_match(&names(&["P1", "P2"])).await.unwrap();
        let room = host.host_room().await.unwrap();
        spectator.join_room(&room.as_str().to_lowercase()).await.unwrap();
        assert!(spectator.view().await.read_only);

        host.set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(3))
            .await
            .unwrap();
        host.set_cell(1, CellPosition::Full, ScoreCellValue::Numeric(30))
            .await
            .unwrap();

        let mirrored = wait_for(&spectator, |v| v.move_log.len() == 2).await;
        let authored = host.view().await;
        assert_eq!(mirrored.players, authored.players);
        assert_eq!(mirrored.phase, authored.phase);
        assert_eq!(mirrored.instant_winner, authored.instant_winner);
        assert_eq!(mirrored.move_log, authored.move_log);
        assert_eq!(mirrored.sync, SyncStatus::Live);
        assert!(mirrored.read_only);
        assert_eq!(channel.publish_count(), 3);
    }

    #[tokio::test]
    async fn spectator_commands_are_no_ops() {
        let (host_dir, spectator_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&host_dir), PUSH_TIMEOUT);
        let spectator = RoomSession::new(channel.clone(), store(&spectator_dir), PUSH_TIMEOUT);

        host.start_match(&names(&["P1"])).await.unwrap();
        let room = host.host_room().await.unwrap();
        spectator.join_room(room.as_str()).await.unwrap();
        let before = wait_for(&spectator, |v| v.sync == SyncStatus::Live).await;
        let published = channel.publish_count();

        let outcome = spectator
            .set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(2))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Ignored);
        assert_eq!(
            spectator.start_match(&names(&["X"])).await.unwrap(),
            CommandOutcome::Ignored
        );
        assert_eq!(spectator.request_finish().await.unwrap(), CommandOutcome::Ignored);
        assert_eq!(spectator.request_reset(true).await.unwrap(), CommandOutcome::Ignored);

        let after = spectator.view().await;
        assert_eq!(after.players, before.players);
        assert_eq!(after.move_log.len(), 0);
        assert_eq!(channel.publish_count(), published);
    }

    #[tokio::test]
    async fn instant_win_waits_for_confirmation() {
        let dir = TempDir::new().unwrap();
        let session = RoomSession::new(Arc::new(MemoryChannel::new()), store(&dir), PUSH_TIMEOUT);
        session.start_match(&names(&["P1", "P2"])).await.unwrap();
        session
            .set_cell(1, CellPosition::Full, ScoreCellValue::Numeric(30))
            .await
            .unwrap();

        assert!(session
            .set_cell(0, CellPosition::Poker, ScoreCellValue::InstantWin)
            .await
            .is_err());

        let id = prompt_id(
            session
                .set_cell(0, CellPosition::FirstGrande, ScoreCellValue::InstantWin)
                .await
                .unwrap(),
        );
        let pending = session.view().await;
        assert_eq!(pending.phase, MatchPhase::Playing);
        assert!(pending.pending.is_some());
        assert_eq!(pending.move_log.len(), 1);

        session.cancel(id).await.unwrap();
        let cancelled = session.view().await;
        assert!(cancelled.pending.is_none());
        assert_eq!(cancelled.phase, MatchPhase::Playing);
        assert!(cancelled.instant_winner.is_none());

        let id = prompt_id(
            session
                .set_cell(0, CellPosition::FirstGrande, ScoreCellValue::InstantWin)
                .await
                .unwrap(),
        );
        session.confirm(id).await.unwrap();
        let finished = session.view().await;
        assert_eq!(finished.phase, MatchPhase::Finished);
        assert_eq!(finished.instant_winner.as_deref(), Some("P1"));
        assert_eq!(finished.winner.as_deref(), Some("P1"));
        assert_eq!(finished.standings[0].name, "P2");
        assert!(matches!(
            session.confirm(id).await,
            Err(SessionError::Confirm(_))
        ));
    }

    #[tokio::test]
    async fn host_reconnect_fetches_before_pushing() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let room = RoomId::parse("RECON").unwrap();

        let mut remote = MatchState::new();
        remote.start(&["Ana", "Beto"]).unwrap();
        remote
            .set_cell(1, CellPosition::Senas, ScoreCellValue::Numeric(18))
            .unwrap();
        channel.seed(&room, RoomSnapshot::capture(&remote));

        let store = store(&dir);
        store
            .save_room(&RoomIdentity {
                room_id: room.clone(),
                role: Role::Host,
            })
            .unwrap();

        let gate = channel.fetch_gate.lock().await;
        let host = RoomSession::resume(channel.clone(), store, PUSH_TIMEOUT).await;
        assert_eq!(host.view().await.sync, SyncStatus::Syncing);

        host.start_match(&names(&["Zed"])).await.unwrap();
        assert_eq!(channel.publish_count(), 0);
        drop(gate);

        let view = wait_for(&host, |v| v.sync == SyncStatus::Live).await;
        assert_eq!(view.players, remote.players);
        assert_eq!(view.move_log, remote.move_log);
        assert_eq!(channel.publish_count(), 0);

        host.set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(1))
            .await
            .unwrap();
        assert_eq!(channel.publish_count(), 1);
        assert_eq!(channel.record(&room).unwrap().game.move_log.len(), 2);
    }

    #[tokio::test]
    async fn leaving_tears_down_the_subscription() {
        let (host_dir, spectator_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&host_dir), PUSH_TIMEOUT);
        let spectator_store = store(&spectator_dir);
        let spectator = RoomSession::new(channel.clone(), spectator_store.clone(), PUSH_TIMEOUT);

        host.start_match(&names(&["P1"])).await.unwrap();
        let room = host.host_room().await.unwrap();
        spectator.join_room(room.as_str()).await.unwrap();
        wait_for(&spectator, |v| v.sync == SyncStatus::Live).await;
        assert_eq!(channel.listeners(), 1);

        let id = prompt_id(spectator.request_leave().await.unwrap());
        spectator.confirm(id).await.unwrap();

        let view = spectator.view().await;
        assert!(view.room.is_none());
        assert_eq!(view.sync, SyncStatus::Local);
        assert_eq!(view.phase, MatchPhase::Setup);
        assert!(spectator_store.load_room().is_none());

        timeout(Duration::from_secs(2), async {
            while channel.listeners() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscription still attached");

        host.set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(5))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(spectator.view().await.players.is_empty());
    }

    #[tokio::test]
    async fn cancel_join_returns_to_setup() {
        let dir = TempDir::new().unwrap();
        let spectator = RoomSession::new(Arc::new(MemoryChannel::new()), store(&dir), PUSH_TIMEOUT);

        spectator.join_room("EMPTY").await.unwrap();
        assert_eq!(spectator.view().await.sync, SyncStatus::Syncing);
        assert!(matches!(
            spectator.join_room("OTHER").await,
            Err(SessionError::AlreadyInRoom(_))
        ));

        spectator.cancel_join().await.unwrap();
        assert!(spectator.view().await.room.is_none());
        assert!(matches!(
            spectator.cancel_join().await,
            Err(SessionError::NotJoining)
        ));
        assert!(matches!(
            spectator.join_room("bad!").await,
            Err(SessionError::InvalidRoomId(_))
        ));
    }

    #[tokio::test]
    async fn hard_reset_preserves_names_and_clears_records() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let session = RoomSession::new(Arc::new(MemoryChannel::new()), store.clone(), PUSH_TIMEOUT);
        session
            .update_preference(DisplayPreference {
                notation_style: crate::store::persistence::NotationStyle::Emoji,
            })
            .await;
        session.start_match(&names(&["P1", "P2"])).await.unwrap();
        session
            .set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(3))
            .await
            .unwrap();
        session.host_room().await.unwrap();

        let id = prompt_id(session.request_reset(true).await.unwrap());
        assert_eq!(session.view().await.players.len(), 2);
        session.confirm(id).await.unwrap();

        let view = session.view().await;
        assert_eq!(view.phase, MatchPhase::Setup);
        assert_eq!(view.setup_names, ["P1", "P2"]);
        assert!(view.players.is_empty());
        assert!(view.move_log.is_empty());
        assert!(view.room.is_none());
        assert!(store.load_room().is_none());
        assert!(!store.load_match().has_players());
        assert_eq!(
            store.load_preference().notation_style,
            crate::store::persistence::NotationStyle::Emoji
        );
    }

    #[tokio::test]
    async fn failed_push_keeps_host_state_and_warns() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&dir), PUSH_TIMEOUT);
        host.start_match(&names(&["P1"])).await.unwrap();
        host.host_room().await.unwrap();
        let mut updates = host.subscribe_updates();

        channel.fail_writes(true);
        let outcome = host
            .set_cell(0, CellPosition::Quinas, ScoreCellValue::Numeric(15))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(host.view().await.players[0].total, 15);

        let first = updates.recv().await.unwrap();
        assert!(matches!(first, ServerMsg::View { ref view } if view.players[0].total == 15));
        let second = updates.recv().await.unwrap();
        assert!(matches!(second, ServerMsg::Warning { ref code, .. } if code == "channel_write"));
    }

    #[tokio::test]
    async fn stalled_push_is_bounded_and_the_view_goes_out_first() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&dir), PUSH_TIMEOUT);
        host.start_match(&names(&["P1", "P2"])).await.unwrap();
        host.host_room().await.unwrap();
        let mut updates = host.subscribe_updates();

        channel.stall_writes(true);
        let outcome = timeout(
            Duration::from_secs(2),
            host.set_cell(0, CellPosition::Balas, ScoreCellValue::Numeric(3)),
        )
        .await
        .expect("command blocked on the stalled push")
        .unwrap();
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(host.view().await.players[0].total, 3);

        let first = updates.recv().await.unwrap();
        assert!(matches!(first, ServerMsg::View { ref view } if view.players[0].total == 3));
        match updates.recv().await.unwrap() {
            ServerMsg::Warning { code, message } => {
                assert_eq!(code, "channel_write");
                assert!(message.contains("200 ms"));
            }
            other => panic!("expected a write warning, got {other:?}"),
        }
        assert_eq!(channel.publish_count(), 1);
    }

    #[tokio::test]
    async fn read_warning_reaches_the_ui_before_the_room_goes_live() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let spectator = RoomSession::new(channel.clone(), store(&dir), PUSH_TIMEOUT);
        let room = RoomId::parse("LATE1").unwrap();

        spectator.join_room(room.as_str()).await.unwrap();
        let mut updates = spectator.subscribe_updates();
        timeout(Duration::from_secs(2), async {
            while channel.listeners() == 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("spectator never subscribed");

        channel.report(
            &room,
            ChannelError::Read {
                backend: "memory",
                reason: "stream closed".to_string(),
            },
        );
        match updates.recv().await.unwrap() {
            ServerMsg::Warning { code, message } => {
                assert_eq!(code, "channel_read");
                assert_eq!(message, "memory read failed: stream closed");
            }
            other => panic!("expected a read warning, got {other:?}"),
        }
        assert_eq!(spectator.view().await.sync, SyncStatus::Syncing);

        let mut remote = MatchState::new();
        remote.start(&["Ana"]).unwrap();
        channel
            .publish(&room, &RoomSnapshot::capture(&remote))
            .await
            .unwrap();
        match updates.recv().await.unwrap() {
            ServerMsg::View { view } => {
                assert_eq!(view.sync, SyncStatus::Live);
                assert_eq!(view.players, remote.players);
                assert!(view.read_only);
            }
            other => panic!("expected a live view, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn room_id_draws_skip_taken_ids_then_give_up() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&dir), PUSH_TIMEOUT);
        host.start_match(&names(&["P1"])).await.unwrap();

        channel.take_every_room(true);
        let room = host.host_room().await.unwrap();
        assert_eq!(channel.fetch_count(), MAX_ROOM_ID_DRAWS);
        assert_eq!(host.view().await.room.map(|r| r.room_id), Some(room.clone()));
        assert_eq!(channel.record(&room).unwrap().player_count(), 1);
    }

    #[tokio::test]
    async fn room_id_draw_stops_at_the_first_free_id() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let host = RoomSession::new(channel.clone(), store(&dir), PUSH_TIMEOUT);

        host.host_room().await.unwrap();
        assert_eq!(channel.fetch_count(), 1);
    }

    #[tokio::test]
    async fn resumed_spectator_rejoins_its_room() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let room = RoomId::parse("SPEC1").unwrap();
        let mut remote = MatchState::new();
        remote.start(&["Ana"]).unwrap();
        channel.seed(&room, RoomSnapshot::capture(&remote));

        let store = store(&dir);
        store
            .save_room(&RoomIdentity {
                room_id: room.clone(),
                role: Role::Spectator,
            })
            .unwrap();

        let spectator = RoomSession::resume(channel, store, PUSH_TIMEOUT).await;
        let view = wait_for(&spectator, |v| v.sync == SyncStatus::Live).await;
        assert_eq!(view.players, remote.players);
        assert_eq!(view.room.map(|r| r.room_id), Some(room));
    }
}
