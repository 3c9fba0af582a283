use thiserror::Error;

/// Errors reported across the public API boundary.
///
/// Protocol failures (lost messages, unanswered requests) are never
/// reported this way; they surface later as timer-driven events on the
/// per-call event callback.  `Err` is reserved for caller-contract
/// violations and malformed wire input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("dialog error: {0}")]
    Dialog(String),
    #[error("endpoint error: {0}")]
    Endpoint(String),
}

pub type Result<T> = std::result::Result<T, Error>;
