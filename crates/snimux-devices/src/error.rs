use snimux_mapping::MappingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Status code a non-fatal error maps to at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    FailedPrecondition,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

/// Error taxonomy for device operations.
///
/// Fatal errors mean the transport can no longer be trusted: the device is
/// closed, the container evicts it, and the next call reopens. Non-fatal
/// errors leave the session healthy.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device was torn down; callers fail fast until a reopen.
    #[error("device is closed")]
    Closed,

    /// The request deadline elapsed mid-operation. In-flight writes may have
    /// been delivered; treat them as indeterminate.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Transport-level failure (I/O error, framing violation).
    #[error("device fault: {0}")]
    Fatal(String),

    /// Protocol-level result in an otherwise healthy exchange.
    #[error("{0}")]
    NonFatal(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Capability or configuration precondition not met; the session
    /// survives and the caller may retry after fixing the setup.
    #[error("{0}")]
    FailedPrecondition(String),

    #[error(transparent)]
    UnknownMapping(#[from] MappingError),
}

impl DeviceError {
    /// Wrap an I/O error, classifying timeouts as deadline expiry.
    pub fn from_io(context: &str, err: std::io::Error) -> DeviceError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                DeviceError::DeadlineExceeded
            }
            _ => DeviceError::Fatal(format!("{context}: {err}")),
        }
    }

    pub fn fatal(message: impl Into<String>) -> DeviceError {
        DeviceError::Fatal(message.into())
    }

    pub fn non_fatal(message: impl Into<String>) -> DeviceError {
        DeviceError::NonFatal(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> DeviceError {
        DeviceError::InvalidArgument(message.into())
    }

    pub fn unsupported(operation: &str) -> DeviceError {
        DeviceError::FailedPrecondition(format!("device does not support {operation}"))
    }

    /// Whether this error must tear the device session down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::Closed | DeviceError::DeadlineExceeded | DeviceError::Fatal(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DeviceError::Closed => StatusCode::Unavailable,
            DeviceError::DeadlineExceeded => StatusCode::DeadlineExceeded,
            DeviceError::Fatal(_) => StatusCode::Internal,
            DeviceError::NonFatal(_) => StatusCode::Internal,
            DeviceError::InvalidArgument(_) => StatusCode::InvalidArgument,
            DeviceError::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            DeviceError::UnknownMapping(_) => StatusCode::FailedPrecondition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DeviceError::Closed.is_fatal());
        assert!(DeviceError::DeadlineExceeded.is_fatal());
        assert!(DeviceError::fatal("boom").is_fatal());
        assert!(!DeviceError::non_fatal("protocol code 9").is_fatal());
        assert!(!DeviceError::invalid_argument("range").is_fatal());
        assert!(!DeviceError::UnknownMapping(MappingError::UnknownMapping).is_fatal());
    }

    #[test]
    fn io_timeouts_become_deadline_errors() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        assert!(matches!(
            DeviceError::from_io("recv", timeout),
            DeviceError::DeadlineExceeded
        ));
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(DeviceError::from_io("send", broken).is_fatal());
    }
}
