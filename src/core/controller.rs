//! Room subscription controller
//!
//! Owns the subscription state machine, the terrain cache and the decision
//! of which room's batches the reconciler may accept. A room switch runs as:
//!
//! 1. unsubscribe the old room
//! 2. obtain the target's terrain (cache or async fetch)
//! 3. reset the snapshot to an empty one for the target
//! 4. subscribe the target
//! 5. become `Active(target)` and start accepting its batches
//!
//! Batches are accepted only while `Active`, so nothing from the old room can
//! leak into the new snapshot.

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::constants::TERRAIN_FETCH_TIMEOUT;
use super::io_traits::{FeedError, FeedSink};
use super::reconciler::ObjectReconciler;
use super::room::RoomName;
use super::terrain::{Terrain, TerrainCache};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("could not unsubscribe {room}: {source}")]
    Unsubscribe { room: RoomName, source: FeedError },
    #[error("could not request terrain for {room}: {source}")]
    TerrainRequest { room: RoomName, source: FeedError },
    #[error("could not subscribe {room}: {source}")]
    Subscribe { room: RoomName, source: FeedError },
}

// =============================================================================
// STATE
// =============================================================================

/// Progress of the terrain fetch for a pending room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Requested at the given instant, no answer yet
    InFlight(Instant),
    /// Last attempt failed; the next request for the same room retries
    Failed,
}

impl FetchState {
    fn needs_retry(&self) -> bool {
        match self {
            FetchState::InFlight(at) => at.elapsed() > TERRAIN_FETCH_TIMEOUT,
            FetchState::Failed => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No room yet
    Idle,
    /// First room requested, waiting for its terrain
    Subscribing { target: RoomName, fetch: FetchState },
    /// Subscribed and accepting batches for `current`
    Active { current: RoomName },
    /// Switching rooms; no batches are accepted
    Transitioning {
        from: RoomName,
        to: RoomName,
        fetch: FetchState,
    },
}

impl SubscriptionState {
    pub fn label(&self) -> &'static str {
        match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::Subscribing { .. } => "subscribing",
            SubscriptionState::Active { .. } => "active",
            SubscriptionState::Transitioning { .. } => "transitioning",
        }
    }
}

/// A completed switch: the renderer must be reset with this terrain
#[derive(Debug, Clone)]
pub struct Activation {
    pub room: RoomName,
    pub terrain: Arc<Terrain>,
}

/// Result of a controller operation
#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// Nothing to do
    Unchanged,
    /// Waiting for the terrain of `room`
    AwaitingTerrain { room: RoomName },
    /// Switch finished, `room` is now active
    Completed(Activation),
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Debug)]
pub struct RoomSubscriptionController {
    state: SubscriptionState,
    terrain: TerrainCache,
}

impl Default for RoomSubscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomSubscriptionController {
    pub fn new() -> Self {
        Self {
            state: SubscriptionState::Idle,
            terrain: TerrainCache::new(),
        }
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Room whose batches may be applied, only set while active
    pub fn accepting_room(&self) -> Option<&RoomName> {
        match &self.state {
            SubscriptionState::Active { current } => Some(current),
            _ => None,
        }
    }

    /// Room a pending switch is heading to
    pub fn pending_room(&self) -> Option<&RoomName> {
        match &self.state {
            SubscriptionState::Subscribing { target, .. } => Some(target),
            SubscriptionState::Transitioning { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Room that is shown, or will be once the pending switch completes
    pub fn focus_room(&self) -> Option<&RoomName> {
        self.accepting_room().or_else(|| self.pending_room())
    }

    /// Move towards `target`
    ///
    /// A no-op when `target` is already active or already being fetched. While
    /// a switch is pending, a new target replaces the old one (last request
    /// wins); a failed or timed-out fetch for the same target is retried.
    pub fn request_room_change<F: FeedSink>(
        &mut self,
        target: RoomName,
        feed: &F,
        reconciler: &mut ObjectReconciler,
    ) -> Result<ChangeOutcome, ControllerError> {
        match mem::replace(&mut self.state, SubscriptionState::Idle) {
            SubscriptionState::Idle => {
                info!(room = %target, "[CTRL] Subscribing to first room");
                self.state = SubscriptionState::Subscribing {
                    target,
                    fetch: FetchState::InFlight(Instant::now()),
                };
            }
            SubscriptionState::Active { current } if current == target => {
                self.state = SubscriptionState::Active { current };
                return Ok(ChangeOutcome::Unchanged);
            }
            SubscriptionState::Active { current } => {
                if let Err(source) = feed.unsubscribe(&current.topic()) {
                    warn!(room = %current, error = %source, "[CTRL] Unsubscribe failed, staying");
                    let room = current.clone();
                    self.state = SubscriptionState::Active { current };
                    return Err(ControllerError::Unsubscribe { room, source });
                }
                info!(from = %current, to = %target, "[CTRL] Switching rooms");
                self.state = SubscriptionState::Transitioning {
                    from: current,
                    to: target,
                    fetch: FetchState::InFlight(Instant::now()),
                };
            }
            SubscriptionState::Subscribing { target: pending, fetch } => {
                if pending == target && !fetch.needs_retry() {
                    self.state = SubscriptionState::Subscribing {
                        target: pending,
                        fetch,
                    };
                    return Ok(ChangeOutcome::AwaitingTerrain { room: target });
                }
                debug!(from = %pending, to = %target, "[CTRL] Retargeting pending subscribe");
                self.state = SubscriptionState::Subscribing {
                    target,
                    fetch: FetchState::InFlight(Instant::now()),
                };
            }
            SubscriptionState::Transitioning { from, to, fetch } => {
                if to == target && !fetch.needs_retry() {
                    self.state = SubscriptionState::Transitioning { from, to, fetch };
                    return Ok(ChangeOutcome::AwaitingTerrain { room: target });
                }
                debug!(from = %to, to = %target, "[CTRL] Retargeting pending switch");
                self.state = SubscriptionState::Transitioning {
                    from,
                    to: target,
                    fetch: FetchState::InFlight(Instant::now()),
                };
            }
        }

        self.advance(feed, reconciler)
    }

    /// Store fetched terrain and complete the switch if it was the one awaited
    pub fn on_terrain_loaded<F: FeedSink>(
        &mut self,
        terrain: Terrain,
        feed: &F,
        reconciler: &mut ObjectReconciler,
    ) -> Result<ChangeOutcome, ControllerError> {
        let room = terrain.room().clone();
        self.terrain.insert(terrain);
        debug!(room = %room, cached = self.terrain.len(), "[CTRL] Terrain cached");

        if self.pending_room() == Some(&room) {
            self.complete(feed, reconciler)
        } else {
            debug!(room = %room, "[CTRL] Terrain for superseded target");
            Ok(ChangeOutcome::Unchanged)
        }
    }

    /// Record a failed fetch; the pending switch waits for the next request
    pub fn on_terrain_failed(&mut self, room: &RoomName, reason: &str) {
        if self.pending_room() != Some(room) {
            return;
        }
        warn!(room = %room, reason, "[CTRL] Terrain fetch failed, will retry");
        self.mark_failed();
    }

    /// Rebuild the active room from scratch after a publish failure
    ///
    /// Unsubscribes, clears the snapshot and resubscribes the same room.
    pub fn self_heal<F: FeedSink>(
        &mut self,
        feed: &F,
        reconciler: &mut ObjectReconciler,
    ) -> Result<ChangeOutcome, ControllerError> {
        let current = match &self.state {
            SubscriptionState::Active { current } => current.clone(),
            _ => return Ok(ChangeOutcome::Unchanged),
        };

        warn!(room = %current, "[CTRL] Self-healing subscription");
        if let Err(e) = feed.unsubscribe(&current.topic()) {
            warn!(room = %current, error = %e, "[CTRL] Unsubscribe during self-heal failed");
        }
        reconciler.clear();
        self.state = SubscriptionState::Transitioning {
            from: current.clone(),
            to: current,
            fetch: FetchState::InFlight(Instant::now()),
        };
        self.advance(feed, reconciler)
    }

    /// A batch arrived for a room that is neither active nor pending
    ///
    /// The upstream subscription leaked; drop it.
    pub fn on_stale_batch<F: FeedSink>(&self, room: &RoomName, feed: &F) {
        if self.accepting_room() == Some(room) || self.pending_room() == Some(room) {
            return;
        }
        debug!(room = %room, "[CTRL] Unsubscribing leaked room");
        if let Err(e) = feed.unsubscribe(&room.topic()) {
            warn!(room = %room, error = %e, "[CTRL] Leaked room unsubscribe failed");
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Continue the pending switch: complete from cache or fetch terrain
    fn advance<F: FeedSink>(
        &mut self,
        feed: &F,
        reconciler: &mut ObjectReconciler,
    ) -> Result<ChangeOutcome, ControllerError> {
        let target = match self.pending_room() {
            Some(room) => room.clone(),
            None => return Ok(ChangeOutcome::Unchanged),
        };

        if self.terrain.contains(&target) {
            return self.complete(feed, reconciler);
        }

        match feed.request_terrain(&target) {
            Ok(()) => {
                debug!(room = %target, "[CTRL] Terrain requested");
                Ok(ChangeOutcome::AwaitingTerrain { room: target })
            }
            Err(source) => {
                self.mark_failed();
                Err(ControllerError::TerrainRequest {
                    room: target,
                    source,
                })
            }
        }
    }

    /// Reset the snapshot, subscribe and become active
    fn complete<F: FeedSink>(
        &mut self,
        feed: &F,
        reconciler: &mut ObjectReconciler,
    ) -> Result<ChangeOutcome, ControllerError> {
        let target = match self.pending_room() {
            Some(room) => room.clone(),
            None => return Ok(ChangeOutcome::Unchanged),
        };
        let terrain = match self.terrain.get(&target) {
            Some(terrain) => terrain,
            None => return Ok(ChangeOutcome::AwaitingTerrain { room: target }),
        };

        reconciler.reset(target.clone(), Arc::clone(&terrain));

        if let Err(source) = feed.subscribe(&target.topic()) {
            reconciler.clear();
            self.mark_failed();
            return Err(ControllerError::Subscribe {
                room: target,
                source,
            });
        }

        info!(room = %target, "[CTRL] Room active");
        self.state = SubscriptionState::Active {
            current: target.clone(),
        };
        Ok(ChangeOutcome::Completed(Activation {
            room: target,
            terrain,
        }))
    }

    fn mark_failed(&mut self) {
        match &mut self.state {
            SubscriptionState::Subscribing { fetch, .. }
            | SubscriptionState::Transitioning { fetch, .. } => *fetch = FetchState::Failed,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::IdentityStore;
    use crate::core::io_traits::mocks::{FeedCall, MockFeed};
    use crate::core::reconciler::BatchOutcome;
    use crate::core::terrain::fixtures;
    use crate::core::types::{DiffBatch, DiffEntry};
    use serde_json::{json, Map, Value};

    fn room(name: &str) -> RoomName {
        name.parse().unwrap()
    }

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn creep_batch(name: &str, tick: u64, id: &str) -> DiffBatch {
        DiffBatch::new(room(name), tick).with_diff(DiffEntry::merge(id, attrs(json!({"type": "creep"}))))
    }

    /// Controller active on `name`, with its terrain cached
    fn active_on(name: &str, feed: &MockFeed, reconciler: &mut ObjectReconciler) -> RoomSubscriptionController {
        let mut ctrl = RoomSubscriptionController::new();
        ctrl.request_room_change(room(name), feed, reconciler).unwrap();
        ctrl.on_terrain_loaded(fixtures::terrain(name), feed, reconciler)
            .unwrap();
        assert_eq!(ctrl.accepting_room(), Some(&room(name)));
        feed.take_calls();
        ctrl
    }

    #[test]
    fn test_first_room_fetches_terrain() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = RoomSubscriptionController::new();

        let outcome = ctrl
            .request_room_change(room("E1N1"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::AwaitingTerrain { .. }));
        assert_eq!(ctrl.state().label(), "subscribing");
        assert_eq!(ctrl.accepting_room(), None);
        assert_eq!(feed.take_calls(), vec![FeedCall::Terrain(room("E1N1"))]);

        let outcome = ctrl
            .on_terrain_loaded(fixtures::terrain("E1N1"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::Completed(ref a) if a.room == room("E1N1")));
        assert_eq!(feed.take_calls(), vec![FeedCall::Subscribe("room:E1N1".into())]);
        assert_eq!(reconciler.snapshot().unwrap().room(), &room("E1N1"));
    }

    #[test]
    fn test_same_room_is_no_op() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        let outcome = ctrl
            .request_room_change(room("E1N1"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::Unchanged));
        assert!(feed.take_calls().is_empty());
    }

    #[test]
    fn test_switch_sequence_order() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(
            ctrl.state(),
            SubscriptionState::Transitioning { from, to, fetch: FetchState::InFlight(_) }
                if *from == room("E1N1") && *to == room("W2N3")
        ));
        ctrl.on_terrain_loaded(fixtures::terrain("W2N3"), &feed, &mut reconciler)
            .unwrap();

        assert_eq!(
            feed.take_calls(),
            vec![
                FeedCall::Unsubscribe("room:E1N1".into()),
                FeedCall::Terrain(room("W2N3")),
                FeedCall::Subscribe("room:W2N3".into()),
            ]
        );
        assert_eq!(ctrl.accepting_room(), Some(&room("W2N3")));
    }

    #[test]
    fn test_cached_terrain_completes_immediately() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        ctrl.on_terrain_loaded(fixtures::terrain("W2N3"), &feed, &mut reconciler)
            .unwrap();
        feed.take_calls();

        let outcome = ctrl
            .request_room_change(room("E1N1"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::Completed(_)));
        assert_eq!(feed.terrain_requests(), 0);
    }

    #[test]
    fn test_late_batch_during_transition_is_dropped() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ids = IdentityStore::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        reconciler.apply_batch(ctrl.accepting_room(), creep_batch("E1N1", 1, "old"), &mut ids);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();

        // Late batch from the old room while transitioning
        let outcome = reconciler.apply_batch(ctrl.accepting_room(), creep_batch("E1N1", 2, "late"), &mut ids);
        assert!(matches!(outcome, BatchOutcome::Stale { .. }));
        let snapshot = reconciler.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("late").is_none());

        ctrl.on_terrain_loaded(fixtures::terrain("W2N3"), &feed, &mut reconciler)
            .unwrap();
        reconciler.apply_batch(ctrl.accepting_room(), creep_batch("W2N3", 3, "new"), &mut ids);
        reconciler.apply_batch(ctrl.accepting_room(), creep_batch("E1N1", 3, "late2"), &mut ids);

        let snapshot = reconciler.snapshot().unwrap();
        let ids: Vec<_> = snapshot.objects().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["new"]);
        assert_eq!(snapshot.room(), &room("W2N3"));
    }

    #[test]
    fn test_last_request_wins_while_transitioning() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        ctrl.request_room_change(room("E5N5"), &feed, &mut reconciler)
            .unwrap();
        assert_eq!(ctrl.pending_room(), Some(&room("E5N5")));

        // Superseded terrain arrives: cached but not activated
        let outcome = ctrl
            .on_terrain_loaded(fixtures::terrain("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::Unchanged));
        assert!(ctrl.pending_room().is_some());
        assert!(ctrl.terrain.contains(&room("W2N3")));

        ctrl.on_terrain_loaded(fixtures::terrain("E5N5"), &feed, &mut reconciler)
            .unwrap();
        assert_eq!(ctrl.accepting_room(), Some(&room("E5N5")));
        assert_eq!(feed.subscriptions(), vec!["room:E5N5"]);
    }

    #[test]
    fn test_repeat_request_while_fetching_does_not_refetch() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        let outcome = ctrl
            .request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::AwaitingTerrain { .. }));
        assert_eq!(feed.terrain_requests(), 1);
    }

    #[test]
    fn test_failed_fetch_retried_on_next_request() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        ctrl.on_terrain_failed(&room("W2N3"), "timeout");
        assert!(ctrl.pending_room().is_some());
        assert_eq!(ctrl.accepting_room(), None);

        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert_eq!(feed.terrain_requests(), 2);
    }

    #[test]
    fn test_terrain_request_error_keeps_transitioning() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);

        feed.set_fail_terrain(true);
        let err = ctrl
            .request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap_err();
        assert!(matches!(err, ControllerError::TerrainRequest { .. }));
        assert!(ctrl.pending_room().is_some());

        feed.set_fail_terrain(false);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert_eq!(feed.terrain_requests(), 1);
    }

    #[test]
    fn test_subscribe_failure_closes_gate() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();

        feed.set_fail_subscribe(true);
        let err = ctrl
            .on_terrain_loaded(fixtures::terrain("W2N3"), &feed, &mut reconciler)
            .unwrap_err();
        assert!(matches!(err, ControllerError::Subscribe { .. }));
        assert_eq!(ctrl.accepting_room(), None);
        assert!(reconciler.snapshot().is_none());

        feed.set_fail_subscribe(false);
        let outcome = ctrl
            .request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        assert!(matches!(outcome, ChangeOutcome::Completed(_)));
    }

    #[test]
    fn test_self_heal_resubscribes_same_room() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ids = IdentityStore::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);
        reconciler.apply_batch(ctrl.accepting_room(), creep_batch("E1N1", 1, "c1"), &mut ids);

        let outcome = ctrl.self_heal(&feed, &mut reconciler).unwrap();
        assert!(matches!(outcome, ChangeOutcome::Completed(ref a) if a.room == room("E1N1")));
        assert_eq!(
            feed.take_calls(),
            vec![
                FeedCall::Unsubscribe("room:E1N1".into()),
                FeedCall::Subscribe("room:E1N1".into()),
            ]
        );
        assert!(reconciler.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_self_heal_outside_active_is_no_op() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = RoomSubscriptionController::new();
        let outcome = ctrl.self_heal(&feed, &mut reconciler).unwrap();
        assert!(matches!(outcome, ChangeOutcome::Unchanged));
        assert!(feed.take_calls().is_empty());
    }

    #[test]
    fn test_stale_batch_unsubscribes_leaked_room() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let ctrl = active_on("E1N1", &feed, &mut reconciler);

        ctrl.on_stale_batch(&room("W9N9"), &feed);
        ctrl.on_stale_batch(&room("E1N1"), &feed);
        assert_eq!(feed.unsubscriptions(), vec!["room:W9N9"]);
    }

    #[test]
    fn test_stale_batch_for_pending_room_kept() {
        let feed = MockFeed::new();
        let mut reconciler = ObjectReconciler::new();
        let mut ctrl = active_on("E1N1", &feed, &mut reconciler);
        ctrl.request_room_change(room("W2N3"), &feed, &mut reconciler)
            .unwrap();
        feed.take_calls();

        ctrl.on_stale_batch(&room("W2N3"), &feed);
        assert!(feed.unsubscriptions().is_empty());
    }
}
