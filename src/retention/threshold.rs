//! Retention cutoff calculation.

use chrono::{DateTime, Duration, Utc};

/// The instant before which documents are eligible for deletion.
///
/// `days_to_keep = 0` yields `now`. A period reaching past the earliest
/// representable instant clamps to it, which matches nothing.
pub fn cutoff(days_to_keep: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days_to_keep)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
