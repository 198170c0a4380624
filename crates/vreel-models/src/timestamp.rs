//! Timestamp formatting helpers for in-source offsets.

/// Round an offset to whole milliseconds.
///
/// Segment boundaries are derived from sums of sampling intervals; rounding
/// keeps them stable across runs and readable in checkpoint files.
pub fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let total_secs = total_secs.max(0.0);
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// Format a `[start, end)` span for log output.
pub fn format_span(start: f64, end: f64) -> String {
    format!("{}-{}", format_seconds(start), format_seconds(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "00:00:00");
        assert_eq!(format_seconds(90.0), "00:01:30");
        assert_eq!(format_seconds(3661.0), "01:01:01");
        assert_eq!(format_seconds(30.5), "00:00:30.500");
    }

    #[test]
    fn test_format_span() {
        assert_eq!(format_span(10.0, 20.0), "00:00:10-00:00:20");
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(0.1 + 0.2), 0.3);
        assert_eq!(round_millis(14.99999999), 15.0);
    }
}
