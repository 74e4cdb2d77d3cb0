/// Opaque identity of one connected client session.
pub type SessionId = uuid::Uuid;

/// Identity of a single submitted job run (fresh per submission).
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
