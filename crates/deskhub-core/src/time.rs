//! Timing utilities

use chrono::{Local, Utc};

/// Timestamp type (milliseconds since the Unix epoch)
pub type Timestamp = u64;

/// Current Unix timestamp in milliseconds
pub fn now() -> Timestamp {
    Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Host UTC offset in minutes, east positive (UTC+05:30 is 330)
pub fn timezone_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Offset;

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }

    #[test]
    fn test_timezone_offset_follows_host_zone() {
        let offset = timezone_offset_minutes();
        let expected = Local::now().offset().fix().local_minus_utc() / 60;
        assert_eq!(offset, expected);
        assert!((-14 * 60..=14 * 60).contains(&offset));
        assert_eq!(offset % 15, 0, "zone offsets are whole quarter hours");
    }
}
