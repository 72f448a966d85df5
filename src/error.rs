use std::fmt::Display;
use std::io;

/// emberdb status values.
///
/// Every fallible operation in the crate returns one of these kinds. I/O and
/// parsing failures are never recovered internally; they are captured into
/// the owning operation's sticky status and surfaced to the caller.
/// `NotFound` is a normal lookup outcome (absent key or tombstone), not a
/// failure.
#[derive(Clone, Debug)]
pub enum Error {
    /// The key does not exist, or the newest visible version is a deletion.
    NotFound,
    /// Invalid persisted data: checksum mismatch, truncated structure, or an
    /// unexpected internal value.
    Corruption(String),
    /// The operation or format variant is not supported by this build.
    NotSupported(String),
    /// Invalid caller-supplied input.
    InvalidArgument(String),
    /// An IO error.
    Io(String),
}

impl std::error::Error for Error {}

/// Statuses compare by kind. Two corruption errors with different messages
/// are the same status.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

/// Constructs an Err(Error::Corruption) for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { Err($crate::error::Error::Corruption(format!($($args)*))) };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_kind() {
        assert_eq!(
            Error::Corruption("bad magic".into()),
            Error::Corruption("truncated".into())
        );
        assert_ne!(Error::NotFound, Error::Corruption("x".into()));
        assert_eq!(Error::NotFound, Error::NotFound);
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_corruption_macro() {
        let r: Result<()> = corruption!("block at offset {}", 42);
        let err = r.unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("offset 42"));
    }
}
