//! Small formatting helpers shared by the reporter and the size report.

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Converts bytes to megabytes (MiB, as Telegram clients display them).
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Rounds to `decimals` places, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Formats a byte rate as `x.xx MB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{:.2} MB/s", bytes_per_sec / BYTES_PER_MB)
}

/// Returns at most the last `max_chars` characters of `s`, respecting UTF-8 boundaries.
pub fn truncate_tail_utf8(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(50 * 1024 * 1024), 50.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.3456, 2), 12.35);
        assert_eq!(round_to(-1.005, 1), -1.0);
        assert_eq!(round_to(70.0, 2), 70.0);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2.0 * 1024.0 * 1024.0), "2.00 MB/s");
    }

    #[test]
    fn test_truncate_tail_utf8() {
        assert_eq!(truncate_tail_utf8("hello", 10), "hello");
        assert_eq!(truncate_tail_utf8("hello", 3), "llo");
        assert_eq!(truncate_tail_utf8("привет", 2), "ет");
        assert_eq!(truncate_tail_utf8("", 2), "");
    }
}
