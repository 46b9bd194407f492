//! Snapshot publisher - hands the reconciled room to the renderer
//!
//! Each publish is a full state, objects ordered by id, with the users the
//! renderer needs for badges and the player the room is focused on.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::identity::IdentityStore;
use super::io_traits::{RenderError, Renderer};
use super::reconciler::RoomSnapshot;
use super::room::RoomName;
use super::terrain::Terrain;
use super::types::GameObject;

/// Complete world state for one render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderState {
    pub room: RoomName,
    #[serde(rename = "gameTime")]
    pub tick: u64,
    pub objects: Vec<GameObject>,
    pub users: Map<String, Value>,
    /// User id the view is focused on (owner, else reserver)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
}

impl RenderState {
    pub fn from_snapshot(snapshot: &RoomSnapshot, identities: &IdentityStore) -> Self {
        Self {
            room: snapshot.room().clone(),
            tick: snapshot.tick(),
            objects: snapshot.objects().cloned().collect(),
            users: identities.to_json(),
            player: snapshot.focus_player().map(str::to_string),
        }
    }
}

/// Summary of a successful publish
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishReport {
    pub tick: u64,
    pub objects: usize,
    pub tick_duration: f32,
}

#[derive(Debug)]
pub struct SnapshotPublisher {
    fallback_tick: f32,
    reported_tick_ms: Option<u32>,
    /// Set after a room switch: the next publish must not animate
    fresh: bool,
    published: u64,
    failures: u64,
}

impl SnapshotPublisher {
    pub fn new(fallback_tick: f32) -> Self {
        Self {
            fallback_tick,
            reported_tick_ms: None,
            fresh: true,
            published: 0,
            failures: 0,
        }
    }

    /// Record the tick duration reported by the server
    pub fn set_reported_tick(&mut self, ms: u32) {
        if ms == 0 {
            return;
        }
        if self.reported_tick_ms != Some(ms) {
            debug!(tick_ms = ms, "[PUB] Tick duration updated");
        }
        self.reported_tick_ms = Some(ms);
    }

    /// Seconds one tick lasts, from the server if known
    pub fn tick_duration(&self) -> f32 {
        match self.reported_tick_ms {
            Some(ms) => ms as f32 / 1000.0,
            None => self.fallback_tick,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Reset the renderer for a newly activated room
    pub fn begin_room<R: Renderer>(&mut self, renderer: &mut R, terrain: &Terrain) -> Result<(), RenderError> {
        self.fresh = true;
        renderer.erase();
        renderer.set_terrain(terrain)
    }

    /// Publish the snapshot; the first publish after a switch is not animated
    pub fn publish<R: Renderer>(
        &mut self,
        renderer: &mut R,
        snapshot: &RoomSnapshot,
        identities: &IdentityStore,
    ) -> Result<PublishReport, RenderError> {
        let state = RenderState::from_snapshot(snapshot, identities);
        let tick_duration = if self.fresh { 0.0 } else { self.tick_duration() };

        match renderer.apply_state(&state, tick_duration) {
            Ok(()) => {
                self.fresh = false;
                self.published += 1;
                Ok(PublishReport {
                    tick: state.tick,
                    objects: state.objects.len(),
                    tick_duration,
                })
            }
            Err(e) => {
                self.failures += 1;
                warn!(room = %state.room, tick = state.tick, error = %e, "[PUB] Publish failed");
                Err(e)
            }
        }
    }
}
