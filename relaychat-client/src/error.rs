use std::{io, path::PathBuf, time::Duration};

use relaychat_core::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("expected {expected} from server, got {received:?}")]
    HandshakeViolation {
        expected: &'static str,
        received: String,
    },
    #[error("transport failure: {0}")]
    Transport(#[from] FrameError),
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("frame cannot be sent: {0}")]
    Unsendable(#[source] FrameError),
    #[error("{}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid nickname: {0}")]
    InvalidNickname(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("connecting to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },
}

impl ClientError {
    /// Fatal errors mean the connection is gone (or never came up). Everything
    /// else affects one message or one local file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::HandshakeViolation { .. }
                | ClientError::Transport(_)
                | ClientError::ConnectionClosed
                | ClientError::ConnectTimeout { .. }
        )
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ClientError::LocalIo {
            path: path.into(),
            source,
        }
    }
}
