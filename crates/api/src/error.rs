/// A session message the protocol router refuses.
///
/// Rendered to the client as `ERROR {message}`; the connection stays open.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid JSON format, must be an object")]
    NotAnObject,

    #[error("Missing request type in JSON")]
    MissingType,

    #[error("Unknown request type")]
    UnknownType(String),

    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("Missing file name to check")]
    MissingFileName,

    #[error("Invalid file name {0}, must be alphanumeric dots and dashes only")]
    InvalidFileName(String),

    #[error("Missing upload header before file upload")]
    MissingUploadHeader,

    #[error("Error saving file")]
    UploadFailed,

    #[error("Missing workflow_id to execute")]
    MissingWorkflowId,

    #[error("Missing expose parameters")]
    MissingExpose,

    #[error("Invalid job id to cancel")]
    InvalidCancelId,
}
