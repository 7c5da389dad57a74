//! Identifier and clock helpers.

mod ids;
pub mod timestamps;

pub use ids::{generate_session_id, parse_session_id};
pub use timestamps::{elapsed_ms, iso_timestamp, now_utc, Timestamp};
