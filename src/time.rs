/// Time utilities.
///
/// All persisted timestamps in the crate come from these two helpers so the
/// clock source can be swapped in one place.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
///
/// Message ordering uses millisecond timestamps; ties within the same
/// millisecond are broken by the store's insertion sequence.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
