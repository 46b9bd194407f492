//! Speedrun tracker - controller progress of the focus room
//!
//! Elapsed ticks count from the first tick observed while the room is
//! shown, so a level reached on the start tick is recorded as 0.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::constants::{controller_level_total, TRACKED_LEVELS};
use super::reconciler::RoomSnapshot;
use super::room::RoomName;

/// One row of the level timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelMilestone {
    pub level: u8,
    /// Ticks from start to reaching the level, or elapsed so far if pending
    pub ticks: u64,
    pub reached: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SpeedrunTracker {
    room: Option<RoomName>,
    start_tick: Option<u64>,
    game_time: u64,
    level: u8,
    progress: u64,
    reached_at: BTreeMap<u8, u64>,
}

impl SpeedrunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from the focus room snapshot
    ///
    /// Switching to another room restarts the run.
    pub fn observe(&mut self, snapshot: &RoomSnapshot) {
        if self.room.as_ref() != Some(snapshot.room()) {
            *self = Self {
                room: Some(snapshot.room().clone()),
                ..Self::default()
            };
        }

        let tick = snapshot.tick();
        if tick == 0 {
            return;
        }
        self.game_time = self.game_time.max(tick);
        let start = *self.start_tick.get_or_insert(tick);

        let Some(controller) = snapshot.controller() else {
            return;
        };
        self.level = controller
            .get("level")
            .and_then(Value::as_u64)
            .and_then(|l| u8::try_from(l).ok())
            .unwrap_or(0);
        self.progress = controller.get_u64("progress").unwrap_or(0);

        for level in TRACKED_LEVELS {
            if self.level >= level && !self.reached_at.contains_key(&level) {
                let ticks = self.game_time - start;
                info!(level, ticks, "[SPEEDRUN] Level reached");
                self.reached_at.insert(level, ticks);
            }
        }
    }

    pub fn room(&self) -> Option<&RoomName> {
        self.room.as_ref()
    }

    /// Ticks since the run started
    pub fn elapsed(&self) -> u64 {
        self.start_tick
            .map(|s| self.game_time.saturating_sub(s))
            .unwrap_or(0)
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Progress towards the next level, None at max level
    pub fn progress_ratio(&self) -> Option<f64> {
        let total = controller_level_total(self.level)?;
        Some(self.progress as f64 / total as f64)
    }

    /// Reached levels plus the next pending one
    pub fn milestones(&self) -> Vec<LevelMilestone> {
        let mut rows = Vec::new();
        for level in TRACKED_LEVELS {
            if let Some(ticks) = self.reached_at.get(&level) {
                rows.push(LevelMilestone {
                    level,
                    ticks: *ticks,
                    reached: true,
                });
            } else if self.level.checked_add(1) == Some(level) {
                rows.push(LevelMilestone {
                    level,
                    ticks: self.elapsed(),
                    reached: false,
                });
            }
        }
        rows
    }
}
