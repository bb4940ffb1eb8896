use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    /// No listener at `path`, or it refused the connection.
    #[error("cannot reach {path}: {source}")]
    Connect { path: PathBuf, source: io::Error },

    #[error("accept failed: {0}")]
    Accept(io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// `sockaddr_un` cannot hold the resolved path.
    #[error("socket path {path} is {len} bytes, limit is {max}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    #[error("namespace {namespace:?} is not usable: {reason}")]
    InvalidNamespace {
        namespace: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
