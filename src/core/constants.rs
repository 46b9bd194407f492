//! Game constants - room geometry, NPC identities, controller levels, timings
//!
//! Values the server uses implicitly and the spectator relies on.

use std::time::Duration;

// =============================================================================
// ROOM GEOMETRY
// =============================================================================

/// Width and height of a room in tiles
pub const ROOM_SIZE: usize = 50;

/// Number of terrain cells in a room
pub const ROOM_AREA: usize = ROOM_SIZE * ROOM_SIZE;

/// Rooms per sector edge
pub const SECTOR_SIZE: i32 = 10;

/// Edge of the room block scanned around a live sector centre
pub const SECTOR_BLOCK: i32 = 12;

/// Sector radius probed when looking for live sectors
pub const SECTOR_SCAN_RADIUS: i32 = 10;

/// Range of rooms around the focus room shown on the minimap
pub const MINIMAP_RANGE: i32 = 2;

// =============================================================================
// NPC IDENTITIES
// =============================================================================

/// User id of the Invader NPC
pub const INVADER_USER_ID: &str = "2";

/// User id of the Source Keeper NPC
pub const SOURCE_KEEPER_USER_ID: &str = "3";

// =============================================================================
// CONTROLLER
// =============================================================================

/// Progress needed to leave each controller level (index = level - 1)
///
/// Level 8 is the maximum and has no upgrade threshold.
pub const CONTROLLER_LEVELS: [u64; 7] = [200, 45_000, 135_000, 405_000, 1_215_000, 3_645_000, 10_935_000];

/// Highest controller level
pub const MAX_CONTROLLER_LEVEL: u8 = 8;

/// Levels whose arrival time is recorded by the speedrun tracker
pub const TRACKED_LEVELS: std::ops::RangeInclusive<u8> = 2..=MAX_CONTROLLER_LEVEL;

/// Progress required to upgrade from `level`, None at max level or level 0
pub fn controller_level_total(level: u8) -> Option<u64> {
    if level == 0 {
        return None;
    }
    CONTROLLER_LEVELS.get(usize::from(level) - 1).copied()
}

// =============================================================================
// POLICY
// =============================================================================

/// Interval between automatic room selections
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(10);

/// How long an operator pin overrides automatic selection
pub const DEFAULT_PIN_DURATION: Duration = Duration::from_secs(60);

/// Ticks a PvP event stays "recent" for selection
pub const DEFAULT_RECENT_WINDOW: u64 = 10;

/// Minimum owner level for the owned-room fallback
pub const DEFAULT_MIN_LEVEL: u32 = 1;

/// Ticks a PvP event stays "recent" for the activity log
pub const ACTIVITY_LOG_WINDOW: u64 = 50;

/// Interval (in ticks) passed to the PvP query
pub const PVP_QUERY_INTERVAL: u64 = 100;

// =============================================================================
// FEED
// =============================================================================

/// Tick duration used until the server reports one
pub const DEFAULT_TICK_SECONDS: f32 = 1.0;

/// Maximum time a terrain fetch may stay unanswered before it is re-issued
pub const TERRAIN_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Number of entries shown on the scoreboard
pub const SCOREBOARD_TOP_N: usize = 15;
