use std::fmt::Display;

use displaydoc::Display as DisplayDoc;
use tracing_error::SpanTrace;

/// All-seeing all-knowing error type for the protocol core.
///
/// Wraps an [`ErrorKind`] together with a captured [`SpanTrace`] so that a
/// failing auth check or state resolution run can be traced back through
/// the `tracing` spans that led to it without the caller having to thread
/// context through every `?`.
#[derive(Debug)]
pub struct Error {
    inner: ErrorKind,
    spantrace: SpanTrace,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.inner
    }

    pub fn into_kind(self) -> ErrorKind {
        self.inner
    }
}

impl<T: Into<ErrorKind>> From<T> for Error {
    fn from(inner: T) -> Self {
        let spantrace = SpanTrace::capture();
        Error { inner: inner.into(), spantrace }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.inner, self.spantrace)
    }
}

impl std::error::Error for Error {}

/// The stable, symbolic error kinds described by the protocol core's error
/// handling design: each surface has a name a caller can match on without
/// parsing the message.
#[derive(Debug, DisplayDoc, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// malformed input to canonicalization or decoding: {0}
    InvalidJson(String),
    /// a signature was present but failed verification
    InvalidSignature,
    /// no public key available for ({0}, {1}) and none fetchable
    MissingKey(String, String),
    /// authorization rule `{rule}` rejected the event: {reason}
    Unauthorized { rule: &'static str, reason: String },
    /// room version `{0}` is not in the registry
    UnsupportedRoomVersion(String),
    /// structural error in a PDU: {0}
    InvalidEvent(String),
    /// remote origin did not respond within the timeout
    NotReachable,
    /// the operation was cancelled
    Cancelled,
    /// a storage backend error occurred: {0}
    Storage(String),
}

impl ErrorKind {
    pub fn unauthorized(rule: &'static str, reason: impl Into<String>) -> Self {
        ErrorKind::Unauthorized { rule, reason: reason.into() }
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(e: serde_json::Error) -> Self {
        ErrorKind::InvalidJson(e.to_string())
    }
}
