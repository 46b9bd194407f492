// screeps-cap: follow the action on a Screeps server and stream it to a renderer

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use screeps_cap::client::config::{Config, PolicyMode};
use screeps_cap::client::display::{spawn_display_thread, SharedView};
use screeps_cap::client::logging::init_logging;
use screeps_cap::client::{FeedClient, JsonLinesRenderer};
use screeps_cap::core::activity_log::ActivityLog;
use screeps_cap::core::constants::{MINIMAP_RANGE, SECTOR_SCAN_RADIUS};
use screeps_cap::core::io_traits::{FeedEventReceiver, FeedSink};
use screeps_cap::core::policy::{FixedFocus, Pinned, PvpRotation, RoomSelectionPolicy, RotationTimer};
use screeps_cap::core::room::MapScan;
use screeps_cap::core::spectator::{DashboardView, Spectator, SpectatorEvent, SpectatorSettings};

/// How often the shared dashboard copy is refreshed
const VIEW_REFRESH: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "screeps-cap", version, about = "Screeps spectator overlay")]
struct Args {
    /// Config file
    #[arg(short, long, env = "SCREEPS_CAP_CONFIG", default_value = Config::CONFIG_FILENAME)]
    config: PathBuf,

    /// Renderer output file (JSON lines); overrides [render].output
    #[arg(short, long, env = "SCREEPS_CAP_OUTPUT")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;

    init_logging(&config.logging);
    info!(server = %config.server.url, mode = ?config.policy.mode, "screeps-cap starting");

    let mut spectator = build_spectator(&config)?;
    let mut renderer = JsonLinesRenderer::new(open_output(args.output.or_else(|| config.render_output()))?);

    let mut feed = FeedClient::new(config.server.clone(), config.feed.clone());
    feed.connect().context("connecting to server")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let view: SharedView = Arc::new(RwLock::new(DashboardView::default()));
    let display = spawn_display_thread(
        Arc::clone(&view),
        Duration::from_secs(config.display.refresh_interval_secs.max(1)),
        Arc::clone(&shutdown),
    );
    let commands = spawn_command_reader();

    let mut rotation = RotationTimer::new(config.policy.rotation_interval());
    let mut map_stats = RotationTimer::new(Duration::from_secs(config.feed.map_stats_interval_secs.max(1)));
    let mut view_timer = RotationTimer::new(VIEW_REFRESH);

    let result = loop {
        let now = Instant::now();

        // Handle feed events
        let mut fatal = None;
        while let Some(event) = feed.poll_event() {
            match spectator.handle_event(event, &feed, &mut renderer) {
                Ok(events) => log_events(&events),
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = fatal {
            error!(error = %e, "Feed lost, shutting down");
            break Err(anyhow::Error::new(e));
        }

        // Operator commands
        match commands.try_recv() {
            Ok(line) => log_events(&spectator.handle_command(&line, now, &feed, &mut renderer)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        if map_stats.is_due(now) {
            if let Err(e) = feed.request_map_stats(spectator.map_scan_rooms()) {
                debug!(error = %e, "Map stats query not sent");
            }
        }

        if rotation.is_due(now) {
            log_events(&spectator.rotate(now, &feed, &mut renderer));
        }

        if view_timer.is_due(now) {
            *view.write() = spectator.view(now);
        }

        thread::sleep(Duration::from_millis(10));
    };

    shutdown.store(true, Ordering::SeqCst);
    feed.disconnect();
    let _ = display.join();
    result
}

fn build_spectator(config: &Config) -> Result<Spectator> {
    let focus = config.focus_room()?;

    let inner: Box<dyn RoomSelectionPolicy + Send> = match (config.policy.mode, &focus) {
        (PolicyMode::Fixed, Some(room)) => Box::new(FixedFocus::new(room.clone())),
        (PolicyMode::Fixed, None) => anyhow::bail!("fixed mode needs policy.focus_room"),
        (PolicyMode::Pvp, _) => match config.policy.seed {
            Some(seed) => Box::new(PvpRotation::with_rng(
                config.policy.recent_window,
                config.policy.min_level,
                StdRng::seed_from_u64(seed),
            )),
            None => Box::new(PvpRotation::new(config.policy.recent_window, config.policy.min_level)),
        },
    };
    let policy = Pinned::new(inner, config.policy.pin_duration());

    let scan = match &focus {
        Some(room) => MapScan::around(room, MINIMAP_RANGE),
        None => MapScan::sectors(SECTOR_SCAN_RADIUS),
    };

    let settings = SpectatorSettings {
        fallback_tick: config.feed.tick_fallback_seconds,
        top_n: config.display.top_n,
        teams: config.display.teams.clone(),
        query_pvp: config.policy.mode == PolicyMode::Pvp,
        track_speedrun: config.policy.mode == PolicyMode::Fixed,
        activity_log: config
            .activity_log_path()
            .map(|path| ActivityLog::new(path, config.activity_log.window)),
        scan,
    };
    info!(policy = policy.inner_name(), rooms = settings.scan.rooms().len(), "Spectator ready");
    Ok(Spectator::new(policy, settings))
}

fn open_output(path: Option<PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            info!(path = %path.display(), "Renderer output");
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

/// Read operator lines (`!room W1N1`) from stdin
fn spawn_command_reader() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(16);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn log_events(events: &[SpectatorEvent]) {
    for event in events {
        match event {
            SpectatorEvent::RoomActivated(room) => info!(room = %room, "Now showing"),
            SpectatorEvent::RoomRequested(room) => info!(room = %room, "Switching"),
            SpectatorEvent::SelfHealed(room) => info!(room = %room, "Resubscribed"),
            SpectatorEvent::ConnectionChanged(status) => info!(status = ?status, "Connection"),
            SpectatorEvent::PublishFailed { room, reason } => {
                warn!(room = %room, reason = %reason, "Publish failed")
            }
            SpectatorEvent::TransitionFailed { room, reason } => {
                warn!(room = %room, reason = %reason, "Switch failed")
            }
            SpectatorEvent::FeedError(message) => warn!(error = %message, "Feed"),
            SpectatorEvent::ActivityLogged(rows) => debug!(rows, "Activity logged"),
            SpectatorEvent::BatchPublished { room, tick, objects } => {
                debug!(room = %room, tick, objects, "Published")
            }
            SpectatorEvent::StaleDropped(room) => debug!(room = %room, "Stale batch"),
        }
    }
}
