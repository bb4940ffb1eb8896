use std::fmt;
use std::io;

use grouplink_connection::MessagingError;
use grouplink_frame::FrameError;
use grouplink_message::CodecError;
use grouplink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => CliError {
            message: format!("{context}: {err}"),
            ..io_error(context, source)
        },
        TransportError::InvalidNamespace { .. } | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: &FrameError) -> CliError {
    match err {
        FrameError::Io(source) => CliError {
            message: format!("{context}: {err}"),
            ..io_error(context, source)
        },
        FrameError::PayloadTooLarge { .. } | FrameError::InvalidMagic => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn codec_error(context: &str, err: &CodecError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn messaging_error(context: &str, err: &MessagingError) -> CliError {
    match err {
        MessagingError::Transport(err) => transport_error(context, err),
        MessagingError::Frame(err) => frame_error(context, err),
        MessagingError::Encoding(err) | MessagingError::Decoding(err) => {
            codec_error(context, err)
        }
        MessagingError::AdmissionRejected(_) => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        MessagingError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MessagingError::Json(_) | MessagingError::SenderMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MessagingError::InvalidChannel
        | MessagingError::Cancelled
        | MessagingError::Disconnected(_)
        | MessagingError::HandshakeFailed(_)
        | MessagingError::Broadcast(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        MessagingError::UnexpectedFrameKind(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn missing_server_is_a_transport_error() {
        let err = MessagingError::Transport(TransportError::Connect {
            path: PathBuf::from("/run/user/1000/grouplink/0.sock"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        let cli = messaging_error("connect failed", &err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.contains("0.sock"));
    }

    #[test]
    fn rejection_and_timeout_codes() {
        let rejected = MessagingError::AdmissionRejected("not on the list".to_string());
        assert_eq!(messaging_error("send", &rejected).code, PERMISSION_DENIED);

        let timeout = MessagingError::Timeout(Duration::from_secs(1));
        assert_eq!(messaging_error("send", &timeout).code, TIMEOUT);
    }

    #[test]
    fn codec_failures_are_data_errors() {
        let err = MessagingError::Encoding(CodecError::EmptyName);
        assert_eq!(messaging_error("send", &err).code, DATA_INVALID);
    }
}
