use daemon_wire::{LogError, WireError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;


/// Failures of a single daemon connection.
///
/// Cloneable because one transport failure is delivered to every request
/// still waiting on that connection.
#[derive(Debug, Clone, Error)]
pub enum ModemError {
    #[error("not connected to the daemon")]
    NotConnected,

    #[error("already connected to the daemon")]
    AlreadyConnected,

    #[error("failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("daemon socket I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("daemon closed the connection")]
    Closed,

    #[error("daemon response could not be parsed: {0}")]
    Protocol(#[from] WireError),

    #[error("daemon sent a response nobody asked for")]
    UnsolicitedResponse,
}

impl ModemError {
    pub(crate) fn io(err: io::Error) -> Self {
        ModemError::Io(Arc::new(err))
    }
}

/// Coarse classification used by callers deciding whether a connection can
/// still be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation issued in the wrong state. Never retried.
    Usage,
    /// The socket failed; the connection is dead.
    Transport,
    /// Bytes from the daemon made no sense; the connection must be discarded.
    Protocol,
    /// The daemon answered with a non-2xx status.
    Daemon,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("daemon returned {status}: {message}")]
    Daemon {
        status: u16,
        message: String,
        body: String,
    },

    #[error("unexpected daemon payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("container logs could not be decoded: {0}")]
    Logs(#[from] LogError),

    #[error("container not launched: cannot {operation}")]
    NotLaunched { operation: &'static str },

    #[error("invalid container operation: {0}")]
    Usage(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Modem(err) => match err {
                ModemError::NotConnected | ModemError::AlreadyConnected => ErrorKind::Usage,
                ModemError::Connect { .. } | ModemError::Io(_) | ModemError::Closed => {
                    ErrorKind::Transport
                }
                ModemError::Protocol(_) | ModemError::UnsolicitedResponse => ErrorKind::Protocol,
            },
            ClientError::Daemon { .. } => ErrorKind::Daemon,
            ClientError::Payload(_) | ClientError::Logs(_) => ErrorKind::Protocol,
            ClientError::NotLaunched { .. } | ClientError::Usage(_) => ErrorKind::Usage,
        }
    }

    /// Daemon status code, when the daemon answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Daemon { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the connection that produced this error must not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_protocol_failures_poison_the_connection() {
        let closed = ClientError::from(ModemError::Closed);
        assert_eq!(closed.kind(), ErrorKind::Transport);
        assert!(closed.poisons_connection());

        let garbage = ClientError::from(ModemError::Protocol(WireError::NonUtf8Head));
        assert_eq!(garbage.kind(), ErrorKind::Protocol);
        assert!(garbage.poisons_connection());
    }

    #[test]
    fn daemon_errors_keep_status_and_body() {
        let err = ClientError::Daemon {
            status: 404,
            message: "No such container: abc".to_string(),
            body: r#"{"message":"No such container: abc"}"#.to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Daemon);
        assert_eq!(err.status(), Some(404));
        assert!(!err.poisons_connection());
        assert_eq!(err.to_string(), "daemon returned 404: No such container: abc");
    }

    #[test]
    fn lifecycle_misuse_is_a_usage_error() {
        let err = ClientError::NotLaunched { operation: "wait" };
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.to_string(), "container not launched: cannot wait");
        assert_eq!(
            ClientError::from(ModemError::NotConnected).kind(),
            ErrorKind::Usage
        );
    }
}
