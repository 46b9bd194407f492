//! Room names and world geometry
//!
//! Rooms are named by quadrant and offset (`W12N3`, `E0S0`). In world
//! coordinates `E0` is x = 0 and `W0` is x = -1; `S0` is y = 0 and `N0` is
//! y = -1.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{SECTOR_BLOCK, SECTOR_SIZE};

// =============================================================================
// ROOM NAME
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomNameError {
    #[error("invalid room name '{0}'")]
    Invalid(String),
}

/// A validated room name with its world coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName {
    name: String,
    x: i32,
    y: i32,
}

impl RoomName {
    /// Build the room name covering world coordinates (x, y)
    pub fn from_xy(x: i32, y: i32) -> Self {
        let (dx, ax) = if x < 0 { ('W', -x - 1) } else { ('E', x) };
        let (dy, ay) = if y < 0 { ('N', -y - 1) } else { ('S', y) };
        Self {
            name: format!("{}{}{}{}", dx, ax, dy, ay),
            x,
            y,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Feed topic carrying object diffs for this room
    pub fn topic(&self) -> String {
        format!("room:{}", self.name)
    }

    /// All rooms within Chebyshev distance `range`, row by row
    pub fn neighbourhood(&self, range: i32) -> Vec<RoomName> {
        let mut rooms = Vec::new();
        for dy in -range..=range {
            for dx in -range..=range {
                rooms.push(RoomName::from_xy(self.x + dx, self.y + dy));
            }
        }
        rooms
    }

    /// The square block of rooms making up the sector around this room
    pub fn sector_block(&self) -> Vec<RoomName> {
        let half = SECTOR_BLOCK / 2;
        let mut rooms = Vec::with_capacity((SECTOR_BLOCK * SECTOR_BLOCK) as usize);
        for xx in 0..SECTOR_BLOCK {
            for yy in 0..SECTOR_BLOCK {
                rooms.push(RoomName::from_xy(self.x + xx - half, self.y + yy - half));
            }
        }
        rooms
    }
}

/// Centre rooms of every sector within `radius` sectors of the origin
pub fn sector_centres(radius: i32) -> Vec<RoomName> {
    let mut rooms = Vec::new();
    for yo in -radius..=radius {
        for xo in -radius..=radius {
            rooms.push(RoomName::from_xy(
                xo * SECTOR_SIZE + SECTOR_SIZE / 2,
                yo * SECTOR_SIZE + SECTOR_SIZE / 2,
            ));
        }
    }
    rooms
}

impl FromStr for RoomName {
    type Err = RoomNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RoomNameError::Invalid(s.to_string());
        let bytes = s.as_bytes();

        let (dx, rest) = bytes.split_first().ok_or_else(invalid)?;
        let split = rest
            .iter()
            .position(|b| *b == b'N' || *b == b'S')
            .ok_or_else(invalid)?;
        let (x_digits, tail) = rest.split_at(split);
        let (dy, y_digits) = tail.split_first().ok_or_else(invalid)?;

        let parse = |digits: &[u8]| -> Option<i32> {
            if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                return None;
            }
            std::str::from_utf8(digits).ok()?.parse().ok()
        };
        let ax = parse(x_digits).ok_or_else(invalid)?;
        let ay = parse(y_digits).ok_or_else(invalid)?;

        let x = match dx {
            b'E' => ax,
            b'W' => -ax - 1,
            _ => return Err(invalid()),
        };
        let y = match dy {
            b'S' => ay,
            b'N' => -ay - 1,
            _ => return Err(invalid()),
        };

        Ok(Self::from_xy(x, y))
    }
}

impl TryFrom<String> for RoomName {
    type Error = RoomNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.name
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// MAP SCAN
// =============================================================================

/// Set of rooms queried for map stats
///
/// Rotation mode starts by probing sector centres and widens to the full
/// block around every sector that answered. Fixed mode scans a square around
/// the focus room.
#[derive(Debug, Clone, PartialEq)]
pub enum MapScan {
    Sectors(Vec<RoomName>),
    Rooms(Vec<RoomName>),
}

impl MapScan {
    pub fn sectors(radius: i32) -> Self {
        MapScan::Sectors(sector_centres(radius))
    }

    pub fn around(focus: &RoomName, range: i32) -> Self {
        MapScan::Rooms(focus.neighbourhood(range))
    }

    pub fn rooms(&self) -> &[RoomName] {
        match self {
            MapScan::Sectors(rooms) | MapScan::Rooms(rooms) => rooms,
        }
    }

    /// Widen a sector probe once its answer is known
    ///
    /// Returns true when the scan changed.
    pub fn widen(&mut self, live_sectors: &[RoomName]) -> bool {
        if !matches!(self, MapScan::Sectors(_)) || live_sectors.is_empty() {
            return false;
        }
        let rooms = live_sectors.iter().flat_map(|s| s.sector_block()).collect();
        *self = MapScan::Rooms(rooms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quadrants() {
        let room: RoomName = "E1N1".parse().unwrap();
        assert_eq!((room.x, room.y), (1, -2));
        let room: RoomName = "W0N0".parse().unwrap();
        assert_eq!((room.x, room.y), (-1, -1));
        let room: RoomName = "E0S0".parse().unwrap();
        assert_eq!((room.x, room.y), (0, 0));
        let room: RoomName = "W12S34".parse().unwrap();
        assert_eq!((room.x, room.y), (-13, 34));
        let padded: RoomName = "W012N3".parse().unwrap();
        assert_eq!(padded.as_str(), "W12N3");
    }

    #[test]
    fn test_xy_round_trip_names() {
        for (x, y) in [(0, 0), (-1, -1), (5, -7), (-20, 3)] {
            let room = RoomName::from_xy(x, y);
            let parsed: RoomName = room.as_str().parse().unwrap();
            assert_eq!(parsed, room);
        }
        assert_eq!(RoomName::from_xy(-3, -3).as_str(), "W2N2");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "E1", "X1N1", "E1Q1", "EN1", "E1N", "e1n1", "E1N1x", "E-1N1"] {
            assert!(bad.parse::<RoomName>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_topics() {
        let room: RoomName = "W2N3".parse().unwrap();
        assert_eq!(room.topic(), "room:W2N3");
    }

    #[test]
    fn test_neighbourhood_size_and_centre() {
        let room: RoomName = "E5N5".parse().unwrap();
        let rooms = room.neighbourhood(2);
        assert_eq!(rooms.len(), 25);
        assert_eq!(rooms[12], room);
    }

    #[test]
    fn test_sector_centres() {
        let centres = sector_centres(1);
        assert_eq!(centres.len(), 9);
        assert!(centres.contains(&"E5S5".parse().unwrap()));
        assert!(centres.contains(&"W4N4".parse().unwrap()));
    }

    #[test]
    fn test_map_scan_widens_once() {
        let mut scan = MapScan::sectors(1);
        assert_eq!(scan.rooms().len(), 9);

        assert!(!scan.widen(&[]));
        assert!(scan.widen(&["E5S5".parse().unwrap()]));
        assert_eq!(scan.rooms().len(), (SECTOR_BLOCK * SECTOR_BLOCK) as usize);

        // Already widened
        assert!(!scan.widen(&["E5S5".parse().unwrap()]));
    }

    #[test]
    fn test_serde_as_string() {
        let room: RoomName = serde_json::from_str("\"E1N1\"").unwrap();
        assert_eq!(room.as_str(), "E1N1");
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"E1N1\"");
        assert!(serde_json::from_str::<RoomName>("\"nope\"").is_err());
    }
}
