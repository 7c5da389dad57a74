//! Run identifiers.

use uuid::Uuid;

/// Issues a fresh session id for a pipeline run.
///
/// Backed by a UUID v7, so ids sort by the time the run started.
#[must_use]
pub fn generate_session_id() -> String {
    format!("session-{}", Uuid::now_v7().simple())
}

/// Extracts the UUID from a session id produced by [`generate_session_id`].
#[must_use]
pub fn parse_session_id(session_id: &str) -> Option<Uuid> {
    session_id
        .strip_prefix("session-")
        .and_then(|raw| Uuid::try_parse(raw).ok())
}
