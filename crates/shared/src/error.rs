use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address '{0}' must start with 0x")]
    MissingPrefix(String),
    #[error("address '{value}' must have 40 hex digits, got {actual}")]
    Length { value: String, actual: usize },
    #[error("address '{0}' contains non-hex characters")]
    NotHex(String),
}

/// The remote reported a workflow ordinal this client does not know.
///
/// Client and ledger disagree on the protocol version when this happens, so it is
/// never mapped to a default phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown workflow phase ordinal {ordinal}")]
pub struct UnknownPhaseError {
    pub ordinal: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workflow phase name '{0}'")]
pub struct UnknownPhaseNameError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ledger event name '{0}'")]
pub struct UnknownEventNameError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Reverted,
    NotFound,
    Validation,
    Unavailable,
    Internal,
}

/// Error body returned by the ledger bridge on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
