//! Utility functions for timestamp and duration arithmetic.

pub mod timestamps;

pub use timestamps::{add_duration, elapsed_ms, now_utc, secs_to_duration, Timestamp};
