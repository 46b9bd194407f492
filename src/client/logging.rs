//! Tracing setup
//!
//! Up to two sinks: a plain-text log file and stderr. Stdout is left alone
//! because it may carry the renderer stream.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::config::LoggingSettings;

/// Extra verbosity for our own targets on top of `RUST_LOG`
const CRATE_DIRECTIVE: &str = "screeps_cap=debug";

/// Flush guards of the non-blocking writers, held until exit
static WRITER_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

fn level_filter() -> EnvFilter {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    match CRATE_DIRECTIVE.parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Directory and file name for the rolling appender
///
/// A bare file name lands in the working directory.
fn appender_target(path: &Path) -> Option<(PathBuf, String)> {
    let file_name = path.file_name()?.to_str()?.to_string();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Some((dir, file_name))
}

/// Install the global subscriber described by `[logging]`
pub fn init_logging(settings: &LoggingSettings) {
    let mut guards = Vec::new();

    let file_layer = settings
        .log_file_path()
        .as_deref()
        .and_then(appender_target)
        .map(|(dir, file_name)| {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            guards.push(guard);
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
        });

    let console_layer = settings.console.then(|| {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        guards.push(guard);
        tracing_subscriber::fmt::layer().with_writer(writer).with_target(false)
    });

    tracing_subscriber::registry()
        .with(level_filter())
        .with(file_layer)
        .with(console_layer)
        .init();

    let _ = WRITER_GUARDS.set(guards);
}
