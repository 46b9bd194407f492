//! Feed protocol types
//!
//! Socket frames and HTTP response bodies exchanged with the game server.
//! These types are transport-independent and are decoded here into the
//! core diff and map types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::io_traits::FeedError;
use super::room::RoomName;
use super::types::{DiffBatch, DiffEntry, IdentityUpdate, MapRoomStats, MapStats, PvpRoom, RoomOwner};

// =============================================================================
// SOCKET COMMANDS (spectator → server)
// =============================================================================

/// Text commands sent over the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Auth(String),
    Subscribe(String),
    Unsubscribe(String),
}

impl SocketCommand {
    pub fn to_text(&self) -> String {
        match self {
            SocketCommand::Auth(token) => format!("auth {}", token),
            SocketCommand::Subscribe(topic) => format!("subscribe {}", topic),
            SocketCommand::Unsubscribe(topic) => format!("unsubscribe {}", topic),
        }
    }
}

// =============================================================================
// SOCKET FRAMES (server → spectator)
// =============================================================================

/// A decoded socket frame
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    /// Authentication accepted, with a refreshed token
    AuthOk(String),
    AuthFailed,
    /// Server tick announcement
    Time(u64),
    /// Diffs for one room
    Room(DiffBatch),
    /// Compressed payload, not supported
    Compressed,
    /// Anything else (protocol/package banners, other channels)
    Other(String),
}

/// Body of a room channel message
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomFrameData {
    #[serde(rename = "gameTime", default)]
    pub game_time: Option<u64>,
    #[serde(default)]
    pub objects: Map<String, Value>,
    #[serde(default)]
    pub users: Option<Map<String, Value>>,
}

impl RoomFrameData {
    /// Convert to a batch, keeping document order
    ///
    /// `null` entries become tombstones; entries that are neither objects
    /// nor null carry no information and are skipped.
    pub fn into_batch(self, room: RoomName) -> DiffBatch {
        let mut batch = DiffBatch::new(room, self.game_time.unwrap_or(0));
        for (id, value) in self.objects {
            match value {
                Value::Null => batch.diffs.push(DiffEntry::tombstone(id)),
                Value::Object(attrs) => batch.diffs.push(DiffEntry::merge(id, attrs)),
                _ => {}
            }
        }
        for (id, value) in self.users.unwrap_or_default() {
            if let Value::Object(attrs) = value {
                batch.identities.push(IdentityUpdate { id, attrs });
            }
        }
        batch
    }
}

/// Extract the room from a `room:<name>` or `room:<shard>/<name>` channel
pub fn room_from_channel(channel: &str) -> Option<RoomName> {
    let rest = channel.strip_prefix("room:")?;
    let name = rest.rsplit('/').next()?;
    name.parse().ok()
}

/// Place a `room:<name>` topic on `shard`; other topics pass through
pub fn shard_topic(topic: &str, shard: Option<&str>) -> String {
    match (shard, topic.strip_prefix("room:")) {
        (Some(shard), Some(name)) if !name.contains('/') => format!("room:{}/{}", shard, name),
        _ => topic.to_string(),
    }
}

/// Decode one text frame from the socket
pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, FeedError> {
    if let Some(rest) = text.strip_prefix("auth ") {
        return Ok(match rest.strip_prefix("ok") {
            Some(token) => SocketFrame::AuthOk(token.trim().to_string()),
            None => SocketFrame::AuthFailed,
        });
    }
    if let Some(rest) = text.strip_prefix("time ") {
        return rest
            .trim()
            .parse()
            .map(SocketFrame::Time)
            .map_err(|_| FeedError::Protocol(format!("bad time frame '{}'", text)));
    }
    if text.starts_with("gz:") {
        return Ok(SocketFrame::Compressed);
    }
    if !text.starts_with('[') {
        return Ok(SocketFrame::Other(text.to_string()));
    }

    let (channel, data): (String, Value) =
        serde_json::from_str(text).map_err(|e| FeedError::Protocol(e.to_string()))?;
    match room_from_channel(&channel) {
        Some(room) => {
            let data: RoomFrameData =
                serde_json::from_value(data).map_err(|e| FeedError::Protocol(e.to_string()))?;
            Ok(SocketFrame::Room(data.into_batch(room)))
        }
        None => Ok(SocketFrame::Other(channel)),
    }
}

// =============================================================================
// HTTP BODIES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SigninRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigninResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainResponse {
    #[serde(default)]
    pub terrain: Vec<TerrainEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainEntry {
    pub terrain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickResponse {
    pub tick: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapStatsRequest<'a> {
    pub rooms: Vec<&'a str>,
    #[serde(rename = "statName")]
    pub stat_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapStatsResponse {
    #[serde(default)]
    pub stats: HashMap<String, RawRoomStats>,
    #[serde(default)]
    pub users: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoomStats {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub own: Option<RoomOwner>,
}

impl MapStatsResponse {
    /// Keep rooms with status `normal` and a parseable name
    pub fn into_map_stats(self) -> MapStats {
        let mut rooms: Vec<MapRoomStats> = self
            .stats
            .into_iter()
            .filter(|(_, s)| s.status == "normal")
            .filter_map(|(name, s)| {
                Some(MapRoomStats {
                    room: name.parse().ok()?,
                    status: s.status,
                    own: s.own,
                })
            })
            .collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));

        let users = self
            .users
            .into_iter()
            .filter_map(|(id, value)| match value {
                Value::Object(attrs) => Some(IdentityUpdate { id, attrs }),
                _ => None,
            })
            .collect();

        MapStats { rooms, users }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PvpResponse {
    #[serde(default)]
    pub pvp: HashMap<String, PvpShard>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PvpShard {
    #[serde(default)]
    pub rooms: Vec<RawPvpRoom>,
    #[serde(default)]
    pub time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPvpRoom {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "lastPvpTime", default)]
    pub last_pvp_time: u64,
}

impl PvpResponse {
    /// Rooms and game time for `shard`, or for the first shard when unset
    pub fn into_rooms(self, shard: Option<&str>) -> (u64, Vec<PvpRoom>) {
        let entry = match shard {
            Some(shard) => self.pvp.get(shard).cloned(),
            None => {
                let mut shards: Vec<_> = self.pvp.into_iter().collect();
                shards.sort_by(|a, b| a.0.cmp(&b.0));
                shards.into_iter().next().map(|(_, s)| s)
            }
        };
        let Some(entry) = entry else {
            return (0, Vec::new());
        };
        let rooms = entry
            .rooms
            .into_iter()
            .filter_map(|r| {
                Some(PvpRoom {
                    room: r.id.parse().ok()?,
                    last_pvp_time: r.last_pvp_time,
                })
            })
            .collect();
        (entry.time, rooms)
    }
}

// =============================================================================
// TESTS
// =============================================================================
