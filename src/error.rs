use thiserror::Error;

/// Rejections surfaced to the acting connection. Every variant is recovered
/// at the boundary of a single action and leaves no partial state behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// Malformed input: length, emptiness, format
    #[error("{0}")]
    Validation(String),
    /// Action attempted outside its legal phase or past its deadline
    #[error("{0}")]
    Phase(String),
    /// Duplicate where uniqueness is required (e.g. nickname taken)
    #[error("{0}")]
    Conflict(String),
    /// Caller lacks the authority for this action
    #[error("{0}")]
    Forbidden(String),
    /// Missing/invalid identity or wrong room password
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("room is full")]
    RoomFull,
    /// System-level failure (store I/O); safe to retry
    #[error("internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Stable wire code for `ServerMessage::Error`
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Validation(_) => "VALIDATION",
            ActionError::Phase(_) => "PHASE",
            ActionError::Conflict(_) => "CONFLICT",
            ActionError::Forbidden(_) => "FORBIDDEN",
            ActionError::Unauthorized(_) => "UNAUTHORIZED",
            ActionError::NotFound(_) => "NOT_FOUND",
            ActionError::RoomFull => "ROOM_FULL",
            ActionError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        ActionError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Internal(e.to_string())
    }
}

pub type ActionResult<T> = Result<T, ActionError>;
