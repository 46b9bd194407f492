//! Core types - platform-independent data structures
//!
//! These types describe the world state carried by the feed and are used
//! throughout the reconciler, controller and publisher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::merge::merge_map;
use super::room::RoomName;

/// Stable identifier of an object inside one room
pub type ObjectId = String;

/// Identifier of a user (identity) on the server
pub type UserId = String;

// =============================================================================
// GAME OBJECT
// =============================================================================

/// An entity in the world (creep, spawn, controller, resource...)
///
/// `attrs` holds every attribute except the id, including `type`. It is
/// merged incrementally from diffs and never replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl GameObject {
    /// Create an object from the first diff seen for `id`
    pub fn from_diff(id: ObjectId, diff: &Map<String, Value>) -> Self {
        let mut attrs = merge_map(&Map::new(), diff);
        attrs.remove("_id");
        Self { id, attrs }
    }

    /// Return this object with `diff` merged on top (field-level override)
    pub fn merged(&self, diff: &Map<String, Value>) -> Self {
        let mut attrs = merge_map(&self.attrs, diff);
        attrs.remove("_id");
        Self {
            id: self.id.clone(),
            attrs,
        }
    }

    /// Object type tag (`creep`, `controller`, ...), empty when unknown
    pub fn kind(&self) -> &str {
        self.attrs.get("type").and_then(Value::as_str).unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Numeric attribute helper
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.attrs.get(key).and_then(Value::as_u64)
    }
}

// =============================================================================
// DIFFS
// =============================================================================

/// A change instruction for one object
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Partial attribute mapping merged into the existing object
    Merge(Map<String, Value>),
    /// Remove the object
    Tombstone,
}

/// A diff together with the id it targets
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub id: ObjectId,
    pub diff: Diff,
}

impl DiffEntry {
    pub fn merge(id: impl Into<ObjectId>, attrs: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            diff: Diff::Merge(attrs),
        }
    }

    pub fn tombstone(id: impl Into<ObjectId>) -> Self {
        Self {
            id: id.into(),
            diff: Diff::Tombstone,
        }
    }
}

/// Partial attribute update for one identity
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUpdate {
    pub id: UserId,
    pub attrs: Map<String, Value>,
}

/// All diffs delivered for one room in one feed message
///
/// Entries are kept in document order; the same id may appear more than
/// once and later entries win.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffBatch {
    pub room: RoomName,
    /// Server tick, 0 when the message did not carry one
    pub tick: u64,
    pub diffs: Vec<DiffEntry>,
    pub identities: Vec<IdentityUpdate>,
}

impl DiffBatch {
    pub fn new(room: RoomName, tick: u64) -> Self {
        Self {
            room,
            tick,
            diffs: Vec::new(),
            identities: Vec::new(),
        }
    }
}

#[cfg(test)]
impl DiffBatch {
    pub fn with_diff(mut self, entry: DiffEntry) -> Self {
        self.diffs.push(entry);
        self
    }

    pub fn with_identity(mut self, id: impl Into<UserId>, attrs: Map<String, Value>) -> Self {
        self.identities.push(IdentityUpdate {
            id: id.into(),
            attrs,
        });
        self
    }
}

// =============================================================================
// MAP QUERIES
// =============================================================================

/// A room with recent PvP activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvpRoom {
    pub room: RoomName,
    /// Tick of the last PvP event in this room
    pub last_pvp_time: u64,
}

/// Owner of a room controller as reported by map stats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOwner {
    pub user: UserId,
    /// Controller level, 0 for reserved rooms
    #[serde(default)]
    pub level: u32,
}

/// Per-room ownership summary from the batched map-stats query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRoomStats {
    pub room: RoomName,
    pub status: String,
    pub own: Option<RoomOwner>,
}

impl MapRoomStats {
    /// Level of the owning controller, 0 when unowned or reserved
    pub fn owner_level(&self) -> u32 {
        self.own.as_ref().map(|o| o.level).unwrap_or(0)
    }
}

/// Result of a map-stats query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapStats {
    /// Rooms with status `normal`
    pub rooms: Vec<MapRoomStats>,
    /// Identities referenced by the owners
    pub users: Vec<IdentityUpdate>,
}

// =============================================================================
// TESTS
// =============================================================================
