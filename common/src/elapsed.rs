use std::time::Duration;

/// Render a wall-clock duration for progress lines: "640ms", "2.31s",
/// "1m05s".
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    match millis {
        0..1000 => format!("{millis}ms"),
        1000..60_000 => format!("{:.2}s", millis as f64 / 1000.0),
        _ => {
            let minutes = millis / 60_000;
            let seconds = (millis % 60_000) / 1000;
            format!("{minutes}m{seconds:02}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_durations_use_milliseconds() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn seconds_get_two_decimals() {
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.00s");
        assert_eq!(format_duration(Duration::from_millis(2310)), "2.31s");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "60.00s");
    }

    #[test]
    fn minutes_pad_the_seconds() {
        assert_eq!(format_duration(Duration::from_secs(65)), "1m05s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m00s");
    }
}
