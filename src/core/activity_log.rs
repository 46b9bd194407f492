//! Append-only CSV log of rooms with recent PvP activity
//!
//! One row per room per query: `timestamp,room,lastPvpTime`, with the
//! timestamp in epoch milliseconds. The file is never read back.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::types::PvpRoom;

#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
    window: u64,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>, window: u64) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows for every room active within the window; returns the row count
    pub fn append(&self, observed_at: DateTime<Utc>, game_time: u64, rooms: &[PvpRoom]) -> io::Result<usize> {
        let rows = format_rows(observed_at, game_time, self.window, rooms);
        if rows.is_empty() {
            return Ok(0);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for row in &rows {
            writeln!(file, "{}", row)?;
        }
        Ok(rows.len())
    }
}

/// CSV rows for rooms whose last PvP tick is within `window` of `game_time`
pub fn format_rows(observed_at: DateTime<Utc>, game_time: u64, window: u64, rooms: &[PvpRoom]) -> Vec<String> {
    let cutoff = game_time.saturating_sub(window);
    let timestamp = observed_at.timestamp_millis();
    rooms
        .iter()
        .filter(|r| r.last_pvp_time > cutoff)
        .map(|r| format!("{},{},{}", timestamp, r.room, r.last_pvp_time))
        .collect()
}
