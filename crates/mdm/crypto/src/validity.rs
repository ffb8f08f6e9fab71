use chrono::{DateTime, Datelike as _, SubsecRound as _, Utc};
use rand::RngCore as _;

/// Validity window of exactly one calendar year starting at `now`, truncated to whole seconds.
///
/// A start on February 29th ends 365 days later.
pub fn one_year_from(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.trunc_subsecs(0);
    let end = start
        .with_year(start.year() + 1)
        .unwrap_or(start + chrono::Duration::days(365));
    (start, end)
}

pub(crate) fn to_offset(t: DateTime<Utc>) -> Result<time::OffsetDateTime, time::error::ComponentRange> {
    time::OffsetDateTime::from_unix_timestamp(t.timestamp())
}

/// 20 random bytes forming a positive DER integer.
pub(crate) fn random_serial() -> [u8; 20] {
    let mut serial = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut serial);
    serial[0] = (serial[0] & 0x7f) | 0x01;
    serial
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_one_year() {
        let (start, end) = one_year_from(at("2026-03-01T12:00:00.750Z"));
        assert_eq!(start, at("2026-03-01T12:00:00Z"));
        assert_eq!(end, at("2027-03-01T12:00:00Z"));
    }

    #[test]
    fn test_leap_day() {
        let (_, end) = one_year_from(at("2028-02-29T00:00:00Z"));
        assert_eq!(end, at("2029-02-28T00:00:00Z"));
    }

    #[test]
    fn test_serials_are_positive_and_distinct() {
        let a = random_serial();
        let b = random_serial();
        assert_ne!(a, b);
        assert_eq!(a[0] & 0x80, 0);
        assert_ne!(a[0], 0);
    }
}
