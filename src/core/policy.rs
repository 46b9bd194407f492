//! Room selection policy
//!
//! A policy proposes the next focus room on each rotation tick. Strategies
//! are swappable behind [`RoomSelectionPolicy`]; operator pins are layered on
//! top by [`Pinned`].

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use super::identity::IdentityStore;
use super::room::RoomName;
use super::types::{MapRoomStats, PvpRoom};

/// What a policy may look at when choosing
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Latest known game time
    pub game_time: u64,
    pub pvp_rooms: &'a [PvpRoom],
    pub map_rooms: &'a [MapRoomStats],
    pub identities: &'a IdentityStore,
}

pub trait RoomSelectionPolicy {
    /// Propose a room, or None when nothing qualifies
    fn select(&mut self, ctx: &SelectionContext<'_>, now: Instant) -> Option<RoomName>;

    fn name(&self) -> &'static str;
}

// =============================================================================
// PVP ROTATION
// =============================================================================

/// Follow the most recent fighting, falling back to owned rooms
pub struct PvpRotation {
    recent_window: u64,
    min_level: u32,
    rng: StdRng,
}

impl PvpRotation {
    pub fn new(recent_window: u64, min_level: u32) -> Self {
        Self::with_rng(recent_window, min_level, StdRng::from_entropy())
    }

    pub fn with_rng(recent_window: u64, min_level: u32, rng: StdRng) -> Self {
        Self {
            recent_window,
            min_level,
            rng,
        }
    }

    /// Rooms whose last PvP event is within the recent window, most recent first
    pub fn qualifying<'a>(&self, ctx: &SelectionContext<'a>) -> Vec<&'a PvpRoom> {
        let cutoff = ctx.game_time.saturating_sub(self.recent_window);
        let mut rooms: Vec<&PvpRoom> = ctx
            .pvp_rooms
            .iter()
            .filter(|r| r.last_pvp_time > cutoff)
            .collect();
        rooms.sort_by(|a, b| b.last_pvp_time.cmp(&a.last_pvp_time));
        rooms
    }
}

impl RoomSelectionPolicy for PvpRotation {
    fn select(&mut self, ctx: &SelectionContext<'_>, _now: Instant) -> Option<RoomName> {
        let recent = self.qualifying(ctx);
        if let Some(top) = recent.first() {
            let ties: Vec<&PvpRoom> = recent
                .iter()
                .copied()
                .filter(|r| r.last_pvp_time == top.last_pvp_time)
                .collect();
            let pick = ties.choose(&mut self.rng)?;
            debug!(room = %pick.room, last_pvp = pick.last_pvp_time, ties = ties.len(), "[POLICY] PvP pick");
            return Some(pick.room.clone());
        }

        let leveled: Vec<&MapRoomStats> = ctx
            .map_rooms
            .iter()
            .filter(|r| r.own.is_some() && r.owner_level() >= self.min_level)
            .collect();
        if let Some(pick) = leveled.choose(&mut self.rng) {
            debug!(room = %pick.room, level = pick.owner_level(), "[POLICY] Owned-room pick");
            return Some(pick.room.clone());
        }

        let tracked: Vec<&MapRoomStats> = ctx
            .map_rooms
            .iter()
            .filter(|r| {
                r.own
                    .as_ref()
                    .is_some_and(|o| ctx.identities.contains(&o.user))
            })
            .collect();
        let pick = tracked.choose(&mut self.rng)?;
        debug!(room = %pick.room, "[POLICY] Tracked-owner pick");
        Some(pick.room.clone())
    }

    fn name(&self) -> &'static str {
        "pvp"
    }
}

// =============================================================================
// FIXED FOCUS
// =============================================================================

/// Always the same room (speedrun display)
pub struct FixedFocus {
    room: RoomName,
}

impl FixedFocus {
    pub fn new(room: RoomName) -> Self {
        Self { room }
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }
}

impl RoomSelectionPolicy for FixedFocus {
    fn select(&mut self, _ctx: &SelectionContext<'_>, _now: Instant) -> Option<RoomName> {
        Some(self.room.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

// =============================================================================
// PINNED OVERRIDE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub room: RoomName,
    pub expires_at: Instant,
}

/// Operator override on top of an automatic strategy
pub struct Pinned {
    inner: Box<dyn RoomSelectionPolicy + Send>,
    duration: Duration,
    pin: Option<Pin>,
}

impl Pinned {
    pub fn new(inner: Box<dyn RoomSelectionPolicy + Send>, duration: Duration) -> Self {
        Self {
            inner,
            duration,
            pin: None,
        }
    }

    /// Force `room` until `now + duration`
    pub fn pin(&mut self, room: RoomName, now: Instant) {
        info!(room = %room, secs = self.duration.as_secs(), "[POLICY] Room pinned");
        self.pin = Some(Pin {
            room,
            expires_at: now + self.duration,
        });
    }

    /// The pin in force at `now`, if any
    pub fn active_pin(&self, now: Instant) -> Option<&Pin> {
        self.pin.as_ref().filter(|p| now < p.expires_at)
    }

    pub fn inner_name(&self) -> &'static str {
        self.inner.name()
    }
}

impl RoomSelectionPolicy for Pinned {
    fn select(&mut self, ctx: &SelectionContext<'_>, now: Instant) -> Option<RoomName> {
        if let Some(pin) = self.active_pin(now) {
            return Some(pin.room.clone());
        }
        if let Some(expired) = self.pin.take() {
            info!(room = %expired.room, "[POLICY] Pin expired, resuming rotation");
        }
        self.inner.select(ctx, now)
    }

    fn name(&self) -> &'static str {
        "pinned"
    }
}

/// Parse an operator chat command, exactly `!room <RoomName>`
pub fn parse_room_command(message: &str) -> Option<RoomName> {
    let line = message.strip_suffix('\r').unwrap_or(message);
    line.strip_prefix("!room ")?.parse().ok()
}

// =============================================================================
// ROTATION TIMER
// =============================================================================

/// Fires once per interval; the first check fires immediately
#[derive(Debug, Clone)]
pub struct RotationTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl RotationTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// True when the interval elapsed; re-arms the timer
    pub fn is_due(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now < due => false,
            _ => {
                self.next_due = Some(now + self.interval);
                true
            }
        }
    }
}
