//! Formatting utilities for dashboard display.

/// Format a duration in seconds as `M:SS` or `H:MM:SS`.
pub fn format_elapsed(secs: f64) -> String {
    let secs = if secs.is_finite() && secs > 0.0 { secs as u64 } else { 0 };
    let mins = secs / 60;
    let hours = mins / 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins % 60, secs % 60)
    } else {
        format!("{}:{:02}", mins, secs % 60)
    }
}

/// Format a 0..1 ratio as a percentage with two decimals.
pub fn format_percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Format how long ago (in ticks) something happened.
pub fn format_ticks_ago(game_time: u64, tick: u64) -> String {
    match game_time.saturating_sub(tick) {
        0 => "now".to_string(),
        1 => "1 tick ago".to_string(),
        n => format!("{} ticks ago", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_seconds() {
        assert_eq!(format_elapsed(5.0), "0:05");
    }

    #[test]
    fn test_format_elapsed_minutes() {
        assert_eq!(format_elapsed(135.0), "2:15");
    }

    #[test]
    fn test_format_elapsed_hours() {
        assert_eq!(format_elapsed(3_723.4), "1:02:03");
    }

    #[test]
    fn test_format_elapsed_negative() {
        assert_eq!(format_elapsed(-5.0), "0:00");
        assert_eq!(format_elapsed(f64::NAN), "0:00");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.25), "25.00%");
        assert_eq!(format_percent(0.123456), "12.35%");
    }

    #[test]
    fn test_format_ticks_ago() {
        assert_eq!(format_ticks_ago(100, 100), "now");
        assert_eq!(format_ticks_ago(100, 99), "1 tick ago");
        assert_eq!(format_ticks_ago(100, 90), "10 ticks ago");
        assert_eq!(format_ticks_ago(90, 100), "now");
    }
}
