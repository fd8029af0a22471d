//! Timestamps embedded in store keys
//!
//! Keys use `%Y%m%dT%H%M%S%3fZ` in UTC so that lexical order is
//! chronological order.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Key timestamp format
pub const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Render a key timestamp
#[must_use]
pub fn stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Parse a key timestamp produced by [`stamp`]
#[must_use]
pub fn parse_stamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
