//! Utility modules.

pub mod datetime;

pub use datetime::{DateTimeParseError, format_timestamp, now_micros, parse_timestamp};
