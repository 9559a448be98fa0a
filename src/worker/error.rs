//! Worker pool error types.

use std::fmt;
use std::io;
use std::time::Duration;

/// Why `serve` refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every worker slot is busy.
    AtCapacity,
    /// The pool was not started or has been stopped.
    NotRunning,
}

impl RejectReason {
    /// Short label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AtCapacity => "at_capacity",
            RejectReason::NotRunning => "not_running",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AtCapacity => write!(f, "worker pool at capacity"),
            RejectReason::NotRunning => write!(f, "worker pool is not running"),
        }
    }
}

/// A connection the pool refused, handed back to the acceptor to close.
pub struct Rejected<C> {
    conn: C,
    reason: RejectReason,
}

impl<C> Rejected<C> {
    pub(crate) fn new(conn: C, reason: RejectReason) -> Self {
        Self { conn, reason }
    }

    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    /// Recover the connection.
    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> fmt::Debug for Rejected<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for Rejected<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection rejected: {}", self.reason)
    }
}

impl<C> std::error::Error for Rejected<C> {}

/// Errors returned by a connection handler.
#[derive(Debug)]
pub enum HandlerError {
    /// The handler took over the connection; the worker must not close it.
    Hijacked,

    /// Network I/O failed.
    Io(io::Error),

    /// The handler did not finish within the configured deadline.
    Timeout(Duration),

    /// The request did not fit in the read buffer.
    SmallReadBuffer,

    /// The handler panicked.
    Panicked(String),

    /// Any other failure.
    Other(String),
}

/// Substrings of error messages that mark expected network noise.
const TRANSIENT_MARKERS: &[&str] = &[
    "broken pipe",
    "reset by peer",
    "unexpected eof",
    "i/o timeout",
    "timed out",
];

impl HandlerError {
    pub fn is_hijacked(&self) -> bool {
        matches!(self, HandlerError::Hijacked)
    }

    /// Whether this error is routine under load and suppressed from the
    /// error log unless `log_all_errors` is set.
    pub fn is_transient(&self) -> bool {
        match self {
            HandlerError::Io(err) => {
                matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::TimedOut
                ) || contains_marker(&err.to_string())
            }
            HandlerError::Timeout(_) | HandlerError::SmallReadBuffer => true,
            HandlerError::Other(msg) => contains_marker(msg),
            HandlerError::Hijacked | HandlerError::Panicked(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Hijacked => "hijacked",
            HandlerError::Io(_) => "io",
            HandlerError::Timeout(_) => "timeout",
            HandlerError::SmallReadBuffer => "small_read_buffer",
            HandlerError::Panicked(_) => "panic",
            HandlerError::Other(_) => "other",
        }
    }
}

fn contains_marker(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker))
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Hijacked => write!(f, "connection hijacked"),
            HandlerError::Io(err) => write!(f, "i/o error: {}", err),
            HandlerError::Timeout(duration) => {
                write!(f, "handler timed out after {}ms", duration.as_millis())
            }
            HandlerError::SmallReadBuffer => write!(f, "small read buffer"),
            HandlerError::Panicked(msg) => write!(f, "handler panic: {}", msg),
            HandlerError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        HandlerError::Io(err)
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Other(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Other(msg.to_string())
    }
}

/// Result type alias for handler calls.
pub type HandlerResult = Result<(), HandlerError>;
