//! Text and time helpers shared by logging and reports.

use std::time::Duration;

/// Truncate a string to `max_chars` characters, ending with "..." when cut.
///
/// Counts Unicode scalar values, never bytes, so it is safe for any input.
pub fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated.trim_end())
    }
}

/// Format a duration as a human-readable string.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let total = duration.as_secs();
        format!("{}m {:02}s", total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::short("hello", 10, "hello")]
    #[case::exact("hello", 5, "hello")]
    #[case::cut("hello world", 8, "hello...")]
    #[case::trims("  padded  ", 10, "padded")]
    #[case::unicode("日本語のテキストです", 6, "日本語...")]
    fn test_truncate(#[case] input: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate(input, max), expected);
    }

    #[rstest]
    #[case::millis(Duration::from_millis(250), "250ms")]
    #[case::seconds(Duration::from_millis(12_340), "12.3s")]
    #[case::minutes(Duration::from_secs(125), "2m 05s")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }
}
