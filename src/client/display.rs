//! Text dashboard
//!
//! The main loop publishes a [`DashboardView`] copy into a shared lock; the
//! display thread reads it on its own schedule and never blocks the loop for
//! longer than a clone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::info;

use crate::core::format::{format_elapsed, format_percent, format_ticks_ago};
use crate::core::spectator::DashboardView;

/// Max PvP rooms listed
const PVP_LINES: usize = 5;

pub type SharedView = Arc<RwLock<DashboardView>>;

/// Render the dashboard as text lines
pub fn render_lines(view: &DashboardView) -> Vec<String> {
    let mut lines = Vec::new();

    let room = view
        .room
        .as_ref()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    let pin = view
        .pinned
        .as_ref()
        .map(|r| format!(" (pinned {})", r))
        .unwrap_or_default();
    lines.push(format!(
        "{} | {} {}{} | tick {} | {:.2}s/tick",
        view.connection, view.state, room, pin, view.tick, view.tick_duration
    ));

    if let Some(player) = &view.player {
        lines.push(format!("Player: {} | {} objects", player, view.objects));
    } else {
        lines.push(format!("{} objects", view.objects));
    }

    if let Some(run) = &view.speedrun {
        let progress = run
            .progress_ratio
            .map(format_percent)
            .unwrap_or_else(|| "max".to_string());
        let elapsed = format_elapsed(run.elapsed_ticks as f64 * f64::from(view.tick_duration));
        lines.push(format!(
            "RCL {} {} | {} ticks ({})",
            run.level, progress, run.elapsed_ticks, elapsed
        ));
        for m in &run.milestones {
            if m.reached {
                lines.push(format!("  RCL{} at {} ticks", m.level, m.ticks));
            } else {
                lines.push(format!("  RCL{} pending", m.level));
            }
        }
    }

    if !view.pvp.is_empty() {
        lines.push("PvP:".to_string());
        for r in view.pvp.iter().take(PVP_LINES) {
            lines.push(format!("  {} {}", r.room, format_ticks_ago(view.game_time, r.last_pvp_time)));
        }
    }

    if !view.scores.is_empty() {
        lines.push("Scores:".to_string());
        for (rank, s) in view.scores.iter().enumerate() {
            lines.push(format!("  {:>2}. {} {} ({} rooms)", rank + 1, s.username, s.score, s.rooms));
        }
    }

    for team in &view.teams {
        lines.push(format!("Team {}: {} ({} rooms)", team.name, team.score, team.rooms));
    }

    lines.push(format!(
        "published {} | failures {} | stale {} | users {}",
        view.published, view.publish_failures, view.stale_dropped, view.identities
    ));
    lines
}

/// Log the dashboard every `interval` until `shutdown` is set
pub fn spawn_display_thread(view: SharedView, interval: Duration, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut next = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            if Instant::now() >= next {
                let snapshot = view.read().clone();
                for line in render_lines(&snapshot) {
                    info!("[DASH] {}", line);
                }
                next = Instant::now() + interval;
            }
            thread::sleep(Duration::from_millis(100));
        }
    })
}
