use std::{fmt, io, sync::Arc};

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

/// `Error` is the error type for the value-log subsystem.
#[derive(Clone, Debug)]
pub enum Error {
    Io(Arc<io::Error>), // An I/O error occurred
    Corruption(String), // Data corruption detected
    InvalidArgument(String),
    VlogNotFound(u32),
    GcAlreadyInProgress,
    Shutdown,
    Other(String), // Other errors
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::Corruption(err) => write!(f, "Data corruption detected: {err}"),
            Error::InvalidArgument(err) => write!(f, "Invalid argument: {err}"),
            Error::VlogNotFound(id) => write!(f, "Vlog file {id} not found"),
            Error::GcAlreadyInProgress => {
                write!(f, "Vlog garbage collection already in progress")
            }
            Error::Shutdown => write!(f, "Database is shutting down"),
            Error::Other(err) => write!(f, "Other error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(Arc::new(e))
    }
}
