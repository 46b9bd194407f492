//! Room terrain decoding and caching
//!
//! Terrain arrives as a 2500-character string, one digit per cell in row
//! order. Terrain never changes during a session, so decoded grids are cached
//! per room and shared.

use std::collections::HashMap;
use std::sync::Arc;

use num_enum::TryFromPrimitive;
use serde::Serialize;
use thiserror::Error;

use super::constants::{ROOM_AREA, ROOM_SIZE};
use super::room::RoomName;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerrainError {
    #[error("terrain for {room} has {len} cells, expected {expected}", expected = ROOM_AREA)]
    BadLength { room: RoomName, len: usize },
    #[error("terrain for {room} has invalid cell '{ch}' at {index}")]
    BadCell { room: RoomName, index: usize, ch: char },
}

/// Raw terrain code as encoded by the server
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum TerrainCode {
    Plain = 0,
    Wall = 1,
    Swamp = 2,
    /// Wall with the swamp bit also set
    SwampWall = 3,
}

/// Terrain kind as rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainKind {
    Plain,
    Wall,
    Swamp,
}

impl From<TerrainCode> for TerrainKind {
    fn from(code: TerrainCode) -> Self {
        match code {
            TerrainCode::Plain => TerrainKind::Plain,
            TerrainCode::Wall | TerrainCode::SwampWall => TerrainKind::Wall,
            TerrainCode::Swamp => TerrainKind::Swamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TerrainCell {
    pub x: u8,
    pub y: u8,
    #[serde(rename = "type")]
    pub kind: TerrainKind,
}

/// Decoded 50x50 terrain grid of one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terrain {
    room: RoomName,
    kinds: Vec<TerrainKind>,
}

impl Terrain {
    /// Decode the compact terrain string of `room`
    pub fn decode(room: RoomName, encoded: &str) -> Result<Self, TerrainError> {
        let len = encoded.chars().count();
        if len != ROOM_AREA {
            return Err(TerrainError::BadLength { room, len });
        }

        let mut kinds = Vec::with_capacity(ROOM_AREA);
        for (index, ch) in encoded.chars().enumerate() {
            let code = ch
                .to_digit(10)
                .and_then(|d| TerrainCode::try_from(d as u8).ok());
            match code {
                Some(code) => kinds.push(code.into()),
                None => return Err(TerrainError::BadCell { room, index, ch }),
            }
        }

        Ok(Self { room, kinds })
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// All cells in row order
    pub fn cells(&self) -> impl Iterator<Item = TerrainCell> + '_ {
        self.kinds.iter().enumerate().map(|(i, kind)| TerrainCell {
            x: (i % ROOM_SIZE) as u8,
            y: (i / ROOM_SIZE) as u8,
            kind: *kind,
        })
    }

    /// Number of cells of the given kind
    pub fn count(&self, kind: TerrainKind) -> usize {
        self.kinds.iter().filter(|k| **k == kind).count()
    }
}

/// Per-room terrain cache, owned by the subscription controller
#[derive(Debug, Default)]
pub struct TerrainCache {
    entries: HashMap<RoomName, Arc<Terrain>>,
}

impl TerrainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomName) -> Option<Arc<Terrain>> {
        self.entries.get(room).cloned()
    }

    pub fn contains(&self, room: &RoomName) -> bool {
        self.entries.contains_key(room)
    }

    /// Store a decoded grid, keyed by its own room
    pub fn insert(&mut self, terrain: Terrain) -> Arc<Terrain> {
        let terrain = Arc::new(terrain);
        self.entries
            .insert(terrain.room().clone(), Arc::clone(&terrain));
        terrain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Encoded terrain: wall border, swamp at (10, 10), plain elsewhere
    pub fn encoded_room() -> String {
        let mut out = String::with_capacity(ROOM_AREA);
        for y in 0..ROOM_SIZE {
            for x in 0..ROOM_SIZE {
                let ch = if x == 0 || y == 0 || x == ROOM_SIZE - 1 || y == ROOM_SIZE - 1 {
                    '1'
                } else if x == 10 && y == 10 {
                    '2'
                } else {
                    '0'
                };
                out.push(ch);
            }
        }
        out
    }

    pub fn terrain(room: &str) -> Terrain {
        Terrain::decode(room.parse().unwrap(), &encoded_room()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomName {
        "E1N1".parse().unwrap()
    }

    #[test]
    fn test_decode_cells() {
        let terrain = fixtures::terrain("E1N1");
        let kind_at = |x: u8, y: u8| terrain.cells().find(|c| (c.x, c.y) == (x, y)).map(|c| c.kind);
        assert_eq!(kind_at(0, 0), Some(TerrainKind::Wall));
        assert_eq!(kind_at(10, 10), Some(TerrainKind::Swamp));
        assert_eq!(kind_at(25, 25), Some(TerrainKind::Plain));
        assert_eq!(kind_at(50, 0), None);
        assert_eq!(terrain.count(TerrainKind::Swamp), 1);
        assert_eq!(terrain.count(TerrainKind::Wall), 4 * ROOM_SIZE - 4);
    }

    #[test]
    fn test_code_three_is_wall() {
        let encoded = "3".repeat(ROOM_AREA);
        let terrain = Terrain::decode(room(), &encoded).unwrap();
        assert_eq!(terrain.count(TerrainKind::Wall), ROOM_AREA);
    }

    #[test]
    fn test_cells_row_order() {
        let terrain = fixtures::terrain("E1N1");
        let cells: Vec<_> = terrain.cells().collect();
        assert_eq!(cells.len(), ROOM_AREA);
        assert_eq!((cells[1].x, cells[1].y), (1, 0));
        assert_eq!((cells[ROOM_SIZE].x, cells[ROOM_SIZE].y), (0, 1));
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let err = Terrain::decode(room(), "0123").unwrap_err();
        assert_eq!(err, TerrainError::BadLength { room: room(), len: 4 });
    }

    #[test]
    fn test_decode_rejects_bad_cell() {
        let mut encoded = "0".repeat(ROOM_AREA - 1);
        encoded.push('7');
        let err = Terrain::decode(room(), &encoded).unwrap_err();
        assert!(matches!(err, TerrainError::BadCell { index, ch: '7', .. } if index == ROOM_AREA - 1));
    }

    #[test]
    fn test_cache_shares_grid() {
        let mut cache = TerrainCache::new();
        assert!(cache.is_empty());
        let stored = cache.insert(fixtures::terrain("E1N1"));
        let fetched = cache.get(&room()).unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert!(cache.contains(&room()));
        assert!(!cache.contains(&"W2N3".parse().unwrap()));
        assert_eq!(cache.len(), 1);
    }
}
