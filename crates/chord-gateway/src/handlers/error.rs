//! Handler error types

use crate::protocol::OpCode;
use thiserror::Error;

/// Handler error type
///
/// Every variant is a protocol violation by the remote: the connection is
/// dropped and the next one identifies from scratch.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload did not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The remote sent an op code only clients may send
    #[error("Unexpected op code from gateway: {0}")]
    UnexpectedOpCode(OpCode),

    /// A frame that is not valid JSON
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;
