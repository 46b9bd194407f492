//! Spectator context - wires controller, reconciler and publisher together
//!
//! The spectator is the single owner of the world state. Every feed event,
//! rotation tick and operator command goes through it, one at a time, and
//! the display only ever sees a [`DashboardView`] copy.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::activity_log::ActivityLog;
use super::constants::{DEFAULT_TICK_SECONDS, SCOREBOARD_TOP_N};
use super::controller::{Activation, ChangeOutcome, ControllerError, RoomSubscriptionController};
use super::identity::IdentityStore;
use super::io_traits::{ConnectionStatus, FeedEvent, FeedSink, Renderer};
use super::policy::{parse_room_command, Pinned, RoomSelectionPolicy, SelectionContext};
use super::publisher::SnapshotPublisher;
use super::reconciler::{BatchOutcome, ObjectReconciler};
use super::room::{MapScan, RoomName};
use super::scoreboard::{team_records, top, user_records, ScoreRecord, TeamDef, TeamRecord};
use super::speedrun::{LevelMilestone, SpeedrunTracker};
use super::types::{DiffBatch, MapRoomStats, MapStats, PvpRoom};

// =============================================================================
// EVENTS AND ERRORS
// =============================================================================

/// Events emitted by the spectator for logging and the display
#[derive(Debug, Clone, PartialEq)]
pub enum SpectatorEvent {
    ConnectionChanged(ConnectionStatus),
    /// A switch was started and is waiting for terrain
    RoomRequested(RoomName),
    /// A switch completed
    RoomActivated(RoomName),
    /// An accepted batch was published
    BatchPublished {
        room: RoomName,
        tick: u64,
        objects: usize,
    },
    /// A batch for a room that is not accepted was dropped
    StaleDropped(RoomName),
    /// The renderer rejected a state
    PublishFailed { room: RoomName, reason: String },
    /// The current room was resubscribed after a publish failure
    SelfHealed(RoomName),
    /// A switch could not progress; retried on the next rotation
    TransitionFailed { room: RoomName, reason: String },
    /// Rows appended to the activity log
    ActivityLogged(usize),
    FeedError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpectatorError {
    /// The upstream feed is gone; the session cannot continue
    #[error("upstream feed disconnected: {0}")]
    Disconnected(String),
}

// =============================================================================
// SETTINGS AND VIEW
// =============================================================================

pub struct SpectatorSettings {
    /// Tick duration used until the server reports one
    pub fallback_tick: f32,
    pub top_n: usize,
    pub teams: Vec<TeamDef>,
    /// Query PvP activity on every rotation
    pub query_pvp: bool,
    /// Track controller progress of the focus room
    pub track_speedrun: bool,
    pub activity_log: Option<ActivityLog>,
    pub scan: MapScan,
}

impl Default for SpectatorSettings {
    fn default() -> Self {
        Self {
            fallback_tick: DEFAULT_TICK_SECONDS,
            top_n: SCOREBOARD_TOP_N,
            teams: Vec::new(),
            query_pvp: true,
            track_speedrun: false,
            activity_log: None,
            scan: MapScan::Rooms(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedrunView {
    pub room: Option<RoomName>,
    pub level: u8,
    pub progress_ratio: Option<f64>,
    pub elapsed_ticks: u64,
    pub milestones: Vec<LevelMilestone>,
}

/// Point-in-time copy of everything the display shows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardView {
    pub connection: String,
    pub state: String,
    pub room: Option<RoomName>,
    pub pinned: Option<RoomName>,
    pub tick: u64,
    pub game_time: u64,
    pub tick_duration: f32,
    pub objects: usize,
    /// Display name of the focus player
    pub player: Option<String>,
    pub pvp: Vec<PvpRoomView>,
    pub scores: Vec<ScoreRecord>,
    pub teams: Vec<TeamRecord>,
    pub speedrun: Option<SpeedrunView>,
    pub identities: usize,
    pub published: u64,
    pub publish_failures: u64,
    pub stale_dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PvpRoomView {
    pub room: RoomName,
    pub last_pvp_time: u64,
}

// =============================================================================
// SPECTATOR
// =============================================================================

pub struct Spectator {
    controller: RoomSubscriptionController,
    reconciler: ObjectReconciler,
    identities: IdentityStore,
    publisher: SnapshotPublisher,
    policy: Pinned,
    speedrun: Option<SpeedrunTracker>,
    connection: ConnectionStatus,
    game_time: u64,
    pvp_rooms: Vec<PvpRoom>,
    map_rooms: Vec<MapRoomStats>,
    scan: MapScan,
    top_n: usize,
    teams: Vec<TeamDef>,
    query_pvp: bool,
    activity_log: Option<ActivityLog>,
}

impl Spectator {
    pub fn new(policy: Pinned, settings: SpectatorSettings) -> Self {
        Self {
            controller: RoomSubscriptionController::new(),
            reconciler: ObjectReconciler::new(),
            identities: IdentityStore::new(),
            publisher: SnapshotPublisher::new(settings.fallback_tick),
            policy,
            speedrun: settings.track_speedrun.then(SpeedrunTracker::new),
            connection: ConnectionStatus::Disconnected,
            game_time: 0,
            pvp_rooms: Vec::new(),
            map_rooms: Vec::new(),
            scan: settings.scan,
            top_n: settings.top_n,
            teams: settings.teams,
            query_pvp: settings.query_pvp,
            activity_log: settings.activity_log,
        }
    }

    pub fn controller(&self) -> &RoomSubscriptionController {
        &self.controller
    }

    pub fn reconciler(&self) -> &ObjectReconciler {
        &self.reconciler
    }

    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    pub fn game_time(&self) -> u64 {
        self.game_time
    }

    /// Rooms to include in the next map-stats query
    pub fn map_scan_rooms(&self) -> &[RoomName] {
        self.scan.rooms()
    }

    /// Dispatch one feed event
    ///
    /// Only a disconnect is an error; everything else is reported as events.
    pub fn handle_event<F: FeedSink, R: Renderer>(
        &mut self,
        event: FeedEvent,
        feed: &F,
        renderer: &mut R,
    ) -> Result<Vec<SpectatorEvent>, SpectatorError> {
        let mut events = Vec::new();
        match event {
            FeedEvent::StatusChanged(status) => {
                self.connection = status;
                events.push(SpectatorEvent::ConnectionChanged(status));
            }
            FeedEvent::RoomBatch(batch) => self.on_batch(batch, feed, renderer, &mut events),
            FeedEvent::TerrainLoaded(terrain) => {
                let room = terrain.room().clone();
                let result = self
                    .controller
                    .on_terrain_loaded(terrain, feed, &mut self.reconciler);
                self.on_change(room, result, renderer, &mut events);
            }
            FeedEvent::TerrainFailed { room, reason } => {
                self.controller.on_terrain_failed(&room, &reason);
                events.push(SpectatorEvent::TransitionFailed { room, reason });
            }
            FeedEvent::TickDuration(ms) => self.publisher.set_reported_tick(ms),
            FeedEvent::PvpRooms { game_time, rooms } => self.on_pvp(game_time, rooms, &mut events),
            FeedEvent::MapStats(stats) => self.on_map_stats(stats),
            FeedEvent::Error(message) => {
                warn!(error = %message, "[FEED] Feed error");
                events.push(SpectatorEvent::FeedError(message));
            }
            FeedEvent::Disconnected(reason) => {
                self.connection = ConnectionStatus::Error;
                return Err(SpectatorError::Disconnected(reason));
            }
        }
        Ok(events)
    }

    /// Rotation tick: ask the policy for a room and move towards it
    pub fn rotate<F: FeedSink, R: Renderer>(
        &mut self,
        now: Instant,
        feed: &F,
        renderer: &mut R,
    ) -> Vec<SpectatorEvent> {
        let mut events = Vec::new();
        if self.query_pvp {
            if let Err(e) = feed.request_pvp() {
                debug!(error = %e, "[POLICY] PvP query not sent");
            }
        }

        let ctx = SelectionContext {
            game_time: self.game_time,
            pvp_rooms: &self.pvp_rooms,
            map_rooms: &self.map_rooms,
            identities: &self.identities,
        };
        match self.policy.select(&ctx, now) {
            Some(room) => self.request_change(room, feed, renderer, &mut events),
            None => debug!("[POLICY] No candidate room"),
        }
        events
    }

    /// Operator override: pin `room` and switch to it now
    pub fn pin_room<F: FeedSink, R: Renderer>(
        &mut self,
        room: RoomName,
        now: Instant,
        feed: &F,
        renderer: &mut R,
    ) -> Vec<SpectatorEvent> {
        let mut events = Vec::new();
        self.policy.pin(room.clone(), now);
        self.request_change(room, feed, renderer, &mut events);
        events
    }

    /// Handle an operator chat line; non-commands are ignored
    pub fn handle_command<F: FeedSink, R: Renderer>(
        &mut self,
        message: &str,
        now: Instant,
        feed: &F,
        renderer: &mut R,
    ) -> Vec<SpectatorEvent> {
        match parse_room_command(message) {
            Some(room) => self.pin_room(room, now, feed, renderer),
            None => Vec::new(),
        }
    }

    /// Build the display copy
    pub fn view(&self, now: Instant) -> DashboardView {
        // Only the accepted room's snapshot is shown; a pending switch shows nothing
        let snapshot = self
            .reconciler
            .snapshot()
            .filter(|s| self.controller.accepting_room() == Some(s.room()));
        let records = user_records(&self.map_rooms, &self.identities);
        let teams = if self.teams.is_empty() {
            Vec::new()
        } else {
            team_records(&records, &self.teams)
        };

        DashboardView {
            connection: format!("{:?}", self.connection),
            state: self.controller.state().label().to_string(),
            room: self.controller.focus_room().cloned(),
            pinned: self.policy.active_pin(now).map(|p| p.room.clone()),
            tick: snapshot.map(|s| s.tick()).unwrap_or(0),
            game_time: self.game_time,
            tick_duration: self.publisher.tick_duration(),
            objects: snapshot.map(|s| s.len()).unwrap_or(0),
            player: snapshot
                .and_then(|s| s.focus_player())
                .map(|id| self.identities.display_name(id).to_string()),
            pvp: self
                .pvp_rooms
                .iter()
                .map(|r| PvpRoomView {
                    room: r.room.clone(),
                    last_pvp_time: r.last_pvp_time,
                })
                .collect(),
            scores: top(records, self.top_n),
            teams,
            speedrun: self.speedrun.as_ref().map(|t| SpeedrunView {
                room: t.room().cloned(),
                level: t.level(),
                progress_ratio: t.progress_ratio(),
                elapsed_ticks: t.elapsed(),
                milestones: t.milestones(),
            }),
            identities: self.identities.len(),
            published: self.publisher.published(),
            publish_failures: self.publisher.failures(),
            stale_dropped: self.reconciler.stale_dropped(),
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    fn on_batch<F: FeedSink, R: Renderer>(
        &mut self,
        batch: DiffBatch,
        feed: &F,
        renderer: &mut R,
        events: &mut Vec<SpectatorEvent>,
    ) {
        let outcome = self.reconciler.apply_batch(
            self.controller.accepting_room(),
            batch,
            &mut self.identities,
        );

        match outcome {
            BatchOutcome::Stale { room } => {
                debug!(room = %room, state = self.controller.state().label(), "[RECON] Stale batch dropped");
                self.controller.on_stale_batch(&room, feed);
                events.push(SpectatorEvent::StaleDropped(room));
            }
            BatchOutcome::Applied { tick, .. } => {
                self.game_time = self.game_time.max(tick);
                let Some(snapshot) = self.reconciler.snapshot() else {
                    return;
                };
                if let Some(tracker) = self.speedrun.as_mut() {
                    tracker.observe(snapshot);
                }
                let room = snapshot.room().clone();

                match self.publisher.publish(renderer, snapshot, &self.identities) {
                    Ok(report) => events.push(SpectatorEvent::BatchPublished {
                        room,
                        tick: report.tick,
                        objects: report.objects,
                    }),
                    Err(e) => {
                        events.push(SpectatorEvent::PublishFailed {
                            room: room.clone(),
                            reason: e.to_string(),
                        });
                        let result = self.controller.self_heal(feed, &mut self.reconciler);
                        if matches!(result, Ok(ChangeOutcome::Completed(_))) {
                            events.push(SpectatorEvent::SelfHealed(room.clone()));
                        }
                        self.on_change(room, result, renderer, events);
                    }
                }
            }
        }
    }

    fn on_pvp(&mut self, game_time: u64, mut rooms: Vec<PvpRoom>, events: &mut Vec<SpectatorEvent>) {
        self.game_time = self.game_time.max(game_time);
        rooms.sort_by(|a, b| b.last_pvp_time.cmp(&a.last_pvp_time));
        debug!(rooms = rooms.len(), game_time, "[POLICY] PvP rooms updated");

        if let Some(log) = &self.activity_log {
            match log.append(Utc::now(), self.game_time, &rooms) {
                Ok(0) => {}
                Ok(n) => events.push(SpectatorEvent::ActivityLogged(n)),
                Err(e) => warn!(path = %log.path().display(), error = %e, "Activity log write failed"),
            }
        }
        self.pvp_rooms = rooms;
    }

    fn on_map_stats(&mut self, stats: MapStats) {
        self.identities.apply(&stats.users);
        let live: Vec<RoomName> = stats.rooms.iter().map(|r| r.room.clone()).collect();
        if self.scan.widen(&live) {
            info!(sectors = live.len(), rooms = self.scan.rooms().len(), "Map scan widened");
        }
        self.map_rooms = stats.rooms;
    }

    fn request_change<F: FeedSink, R: Renderer>(
        &mut self,
        room: RoomName,
        feed: &F,
        renderer: &mut R,
        events: &mut Vec<SpectatorEvent>,
    ) {
        let result = self
            .controller
            .request_room_change(room.clone(), feed, &mut self.reconciler);
        self.on_change(room, result, renderer, events);
    }

    /// Turn a controller result into renderer work and events
    fn on_change<R: Renderer>(
        &mut self,
        room: RoomName,
        result: Result<ChangeOutcome, ControllerError>,
        renderer: &mut R,
        events: &mut Vec<SpectatorEvent>,
    ) {
        match result {
            Ok(ChangeOutcome::Unchanged) => {}
            Ok(ChangeOutcome::AwaitingTerrain { room }) => events.push(SpectatorEvent::RoomRequested(room)),
            Ok(ChangeOutcome::Completed(activation)) => self.activate(activation, renderer, events),
            Err(e) => {
                warn!(room = %room, error = %e, "[CTRL] Transition failed, retrying next rotation");
                events.push(SpectatorEvent::TransitionFailed {
                    room,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn activate<R: Renderer>(&mut self, activation: Activation, renderer: &mut R, events: &mut Vec<SpectatorEvent>) {
        if let Err(e) = self.publisher.begin_room(renderer, &activation.terrain) {
            warn!(room = %activation.room, error = %e, "[PUB] Renderer reset failed");
        }
        events.push(SpectatorEvent::RoomActivated(activation.room));
    }
}
