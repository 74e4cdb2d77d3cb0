//! Session protocol message type names and fixed reply texts.
//!
//! Shared by the WebSocket router (inbound parsing) and the broker
//! (outbound job lifecycle messages).

/// Liveness probe; answered with `PONG`.
pub const MSG_TYPE_PING: &str = "PING";

/// Ask whether a file is already staged for this session.
pub const MSG_TYPE_FILE_CHECK_EXISTS: &str = "FILE_CHECK_EXISTS";

/// Announce the binary frame that follows.
pub const MSG_TYPE_FILE_UPLOAD: &str = "FILE_UPLOAD";

/// Submit or cancel a job.
pub const MSG_TYPE_WORKFLOW_OPERATION: &str = "WORKFLOW_OPERATION";

/// Error text sent with a cancelled job's `WORKFLOW_FINISHED`.
pub const CANCELLED_BY_USER: &str = "Workflow run cancelled by user";

/// Error text sent when a queued job outlives the queue TTL.
pub const EXPIRED_IN_QUEUE: &str = "Workflow expired in queue";

/// Error text used when the engine connection drops mid-run.
pub const ENGINE_DISCONNECTED: &str = "Execution engine disconnected";

/// Fallback text when a failed job reported no error messages.
pub const UNKNOWN_ERROR: &str = "Unknown error";
