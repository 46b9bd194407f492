//! Object reconciler - folds diff batches into the room snapshot
//!
//! The snapshot is only ever changed by batches for the room the controller
//! currently accepts. Everything else is reported as stale and left alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use super::identity::IdentityStore;
use super::room::RoomName;
use super::terrain::Terrain;
use super::types::{Diff, DiffBatch, GameObject, ObjectId};

// =============================================================================
// ROOM SNAPSHOT
// =============================================================================

/// Current known state of the subscribed room
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    room: RoomName,
    tick: u64,
    objects: BTreeMap<ObjectId, GameObject>,
    terrain: Arc<Terrain>,
}

impl RoomSnapshot {
    pub fn new(room: RoomName, terrain: Arc<Terrain>) -> Self {
        Self {
            room,
            tick: 0,
            objects: BTreeMap::new(),
            terrain,
        }
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// Last tick folded in, 0 before the first batch
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn terrain(&self) -> &Arc<Terrain> {
        &self.terrain
    }

    pub fn get(&self, id: &str) -> Option<&GameObject> {
        self.objects.get(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects ordered by id
    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// The room controller, if the room has one
    pub fn controller(&self) -> Option<&GameObject> {
        self.objects().find(|o| o.kind() == "controller")
    }

    /// User id of the room's owner, or of the reserver when unowned
    pub fn focus_player(&self) -> Option<&str> {
        let controller = self.controller()?;
        controller
            .get("user")
            .and_then(Value::as_str)
            .or_else(|| {
                controller
                    .get("reservation")
                    .and_then(|r| r.get("user"))
                    .and_then(Value::as_str)
            })
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Result of offering a batch to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was folded into the snapshot
    Applied {
        tick: u64,
        upserted: usize,
        removed: usize,
    },
    /// The batch targets a room that is not accepted; nothing changed
    Stale { room: RoomName },
}

#[derive(Debug, Default)]
pub struct ObjectReconciler {
    snapshot: Option<RoomSnapshot>,
    stale_dropped: u64,
}

impl ObjectReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&RoomSnapshot> {
        self.snapshot.as_ref()
    }

    /// Number of batches dropped as stale since creation
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    /// Discard the current snapshot and start an empty one for `room`
    pub fn reset(&mut self, room: RoomName, terrain: Arc<Terrain>) {
        debug!(room = %room, "[RECON] Snapshot reset");
        self.snapshot = Some(RoomSnapshot::new(room, terrain));
    }

    /// Discard the current snapshot
    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    /// Fold `batch` into the snapshot if it targets the accepted room
    ///
    /// Identity updates are applied whatever the outcome, since identities
    /// do not belong to any room.
    pub fn apply_batch(
        &mut self,
        accepted: Option<&RoomName>,
        batch: DiffBatch,
        identities: &mut IdentityStore,
    ) -> BatchOutcome {
        identities.apply(&batch.identities);

        let snapshot = match self.snapshot.as_mut() {
            Some(s) if accepted == Some(&batch.room) && s.room == batch.room => s,
            _ => {
                self.stale_dropped += 1;
                trace!(room = %batch.room, "[RECON] Stale batch dropped");
                return BatchOutcome::Stale { room: batch.room };
            }
        };

        let mut upserted = 0;
        let mut removed = 0;
        for entry in batch.diffs {
            match entry.diff {
                Diff::Tombstone => {
                    if snapshot.objects.remove(&entry.id).is_some() {
                        removed += 1;
                    }
                }
                Diff::Merge(attrs) => {
                    let next = match snapshot.objects.get(&entry.id) {
                        Some(existing) => existing.merged(&attrs),
                        None => GameObject::from_diff(entry.id.clone(), &attrs),
                    };
                    snapshot.objects.insert(entry.id, next);
                    upserted += 1;
                }
            }
        }

        if batch.tick > snapshot.tick {
            snapshot.tick = batch.tick;
        }

        BatchOutcome::Applied {
            tick: snapshot.tick,
            upserted,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terrain::fixtures;
    use crate::core::types::DiffEntry;
    use serde_json::{json, Map};

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn room(name: &str) -> RoomName {
        name.parse().unwrap()
    }

    fn active(name: &str) -> ObjectReconciler {
        let mut reconciler = ObjectReconciler::new();
        reconciler.reset(room(name), Arc::new(fixtures::terrain(name)));
        reconciler
    }

    #[test]
    fn test_creep_lifecycle() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();

        let first = DiffBatch::new(e1n1.clone(), 10)
            .with_diff(DiffEntry::merge("c1", attrs(json!({"type": "creep", "hits": 100}))));
        reconciler.apply_batch(Some(&e1n1), first, &mut ids);
        let creep = reconciler.snapshot().unwrap().get("c1").unwrap();
        assert_eq!(creep.kind(), "creep");
        assert_eq!(creep.get_u64("hits"), Some(100));

        let second = DiffBatch::new(e1n1.clone(), 11)
            .with_diff(DiffEntry::merge("c1", attrs(json!({"hits": 90}))));
        reconciler.apply_batch(Some(&e1n1), second, &mut ids);
        let creep = reconciler.snapshot().unwrap().get("c1").unwrap();
        assert_eq!(creep.kind(), "creep");
        assert_eq!(creep.get_u64("hits"), Some(90));

        let third = DiffBatch::new(e1n1.clone(), 12).with_diff(DiffEntry::tombstone("c1"));
        let outcome = reconciler.apply_batch(Some(&e1n1), third, &mut ids);
        assert_eq!(
            outcome,
            BatchOutcome::Applied {
                tick: 12,
                upserted: 0,
                removed: 1
            }
        );
        assert!(reconciler.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_stale_batch_is_no_op() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        reconciler.apply_batch(
            Some(&e1n1),
            DiffBatch::new(e1n1.clone(), 5).with_diff(DiffEntry::merge("s1", attrs(json!({"type": "spawn"})))),
            &mut ids,
        );

        let other = DiffBatch::new(room("W2N3"), 6)
            .with_diff(DiffEntry::merge("x", attrs(json!({"type": "creep"}))))
            .with_diff(DiffEntry::tombstone("s1"));
        let outcome = reconciler.apply_batch(Some(&e1n1), other, &mut ids);

        assert_eq!(outcome, BatchOutcome::Stale { room: room("W2N3") });
        let snapshot = reconciler.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("s1").is_some());
        assert_eq!(snapshot.tick(), 5);
        assert_eq!(reconciler.stale_dropped(), 1);
    }

    #[test]
    fn test_batch_rejected_when_nothing_accepted() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        let batch = DiffBatch::new(e1n1, 5).with_diff(DiffEntry::merge("s1", attrs(json!({"type": "spawn"}))));
        let outcome = reconciler.apply_batch(None, batch, &mut ids);
        assert!(matches!(outcome, BatchOutcome::Stale { .. }));
        assert!(reconciler.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_identities_applied_even_when_stale() {
        let mut reconciler = ObjectReconciler::new();
        let mut ids = IdentityStore::new();
        let batch = DiffBatch::new(room("W2N3"), 6).with_identity("u1", attrs(json!({"username": "carol"})));
        reconciler.apply_batch(None, batch, &mut ids);
        assert_eq!(ids.display_name("u1"), "carol");
    }

    #[test]
    fn test_later_entries_win_within_batch() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();

        let batch = DiffBatch::new(e1n1.clone(), 3)
            .with_diff(DiffEntry::merge("a", attrs(json!({"type": "creep"}))))
            .with_diff(DiffEntry::tombstone("a"))
            .with_diff(DiffEntry::tombstone("b"))
            .with_diff(DiffEntry::merge("b", attrs(json!({"type": "source"}))));
        reconciler.apply_batch(Some(&e1n1), batch, &mut ids);

        let snapshot = reconciler.snapshot().unwrap();
        assert!(snapshot.get("a").is_none());
        assert_eq!(snapshot.get("b").unwrap().kind(), "source");
    }

    #[test]
    fn test_tombstone_for_unknown_id_is_ignored() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        let outcome = reconciler.apply_batch(
            Some(&e1n1),
            DiffBatch::new(e1n1.clone(), 1).with_diff(DiffEntry::tombstone("ghost")),
            &mut ids,
        );
        assert_eq!(
            outcome,
            BatchOutcome::Applied {
                tick: 1,
                upserted: 0,
                removed: 0
            }
        );
    }

    #[test]
    fn test_tick_is_monotonic() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        for tick in [10, 8, 0, 12, 11] {
            reconciler.apply_batch(Some(&e1n1), DiffBatch::new(e1n1.clone(), tick), &mut ids);
        }
        assert_eq!(reconciler.snapshot().unwrap().tick(), 12);
    }

    #[test]
    fn test_fold_matches_merged_diffs() {
        // Applying diffs one batch at a time equals applying their merge once
        let e1n1 = room("E1N1");
        let diffs = [
            json!({"type": "creep", "hits": 100, "store": {"energy": 50}}),
            json!({"hits": 80, "store": {"H": 2}}),
            json!({"store": {"energy": 10}, "body": [1, 2]}),
        ];

        let mut stepwise = active("E1N1");
        let mut ids = IdentityStore::new();
        for (i, diff) in diffs.iter().enumerate() {
            let batch = DiffBatch::new(e1n1.clone(), i as u64 + 1)
                .with_diff(DiffEntry::merge("c1", attrs(diff.clone())));
            stepwise.apply_batch(Some(&e1n1), batch, &mut ids);
        }

        let combined = diffs
            .iter()
            .fold(json!({}), |acc, d| crate::core::merge::merge_value(&acc, d));
        let mut once = active("E1N1");
        once.apply_batch(
            Some(&e1n1),
            DiffBatch::new(e1n1.clone(), 3).with_diff(DiffEntry::merge("c1", attrs(combined))),
            &mut ids,
        );

        assert_eq!(
            stepwise.snapshot().unwrap().get("c1"),
            once.snapshot().unwrap().get("c1")
        );
    }

    #[test]
    fn test_focus_player_from_owner_or_reservation() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        reconciler.apply_batch(
            Some(&e1n1),
            DiffBatch::new(e1n1.clone(), 1).with_diff(DiffEntry::merge(
                "ctrl",
                attrs(json!({"type": "controller", "reservation": {"user": "u9"}})),
            )),
            &mut ids,
        );
        assert_eq!(reconciler.snapshot().unwrap().focus_player(), Some("u9"));

        reconciler.apply_batch(
            Some(&e1n1),
            DiffBatch::new(e1n1.clone(), 2)
                .with_diff(DiffEntry::merge("ctrl", attrs(json!({"user": "u1", "level": 3})))),
            &mut ids,
        );
        assert_eq!(reconciler.snapshot().unwrap().focus_player(), Some("u1"));
    }

    #[test]
    fn test_objects_ordered_by_id() {
        let e1n1 = room("E1N1");
        let mut reconciler = active("E1N1");
        let mut ids = IdentityStore::new();
        let batch = DiffBatch::new(e1n1.clone(), 1)
            .with_diff(DiffEntry::merge("zz", attrs(json!({"type": "creep"}))))
            .with_diff(DiffEntry::merge("aa", attrs(json!({"type": "creep"}))));
        reconciler.apply_batch(Some(&e1n1), batch, &mut ids);
        let ids: Vec<_> = reconciler.snapshot().unwrap().objects().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["aa", "zz"]);
    }
}
