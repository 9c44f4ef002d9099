use std::{fmt, path::PathBuf, sync::mpsc};

use relaychat_core::Nickname;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Shutdown,
    ServerClosed,
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Shutdown => write!(f, "shut down by user"),
            CloseReason::ServerClosed => write!(f, "server closed the connection"),
            CloseReason::ReadFailed(err) => write!(f, "read failed: {err}"),
            CloseReason::WriteFailed(err) => write!(f, "write failed: {err}"),
        }
    }
}

/// Everything the UI side learns about, in the order the core produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    RosterChanged(Vec<Nickname>),
    ConversationOpened {
        peer: Nickname,
    },
    PeerMessage {
        from: Nickname,
        text: String,
    },
    FileReceived {
        from: Nickname,
        file_name: String,
        path: PathBuf,
    },
    MessageSent {
        to: Nickname,
        text: String,
    },
    FileSent {
        to: Nickname,
        file_name: String,
        size: u64,
    },
    LocalError {
        peer: Option<Nickname>,
        message: String,
    },
    ConnectionClosed {
        reason: CloseReason,
    },
}

impl ClientEvent {
    /// The conversation this event belongs to, if any.
    pub fn peer(&self) -> Option<&str> {
        match self {
            ClientEvent::ConversationOpened { peer } => Some(peer),
            ClientEvent::PeerMessage { from, .. } | ClientEvent::FileReceived { from, .. } => {
                Some(from)
            }
            ClientEvent::MessageSent { to, .. } | ClientEvent::FileSent { to, .. } => Some(to),
            ClientEvent::LocalError { peer, .. } => peer.as_deref(),
            ClientEvent::RosterChanged(_) | ClientEvent::ConnectionClosed { .. } => None,
        }
    }

    /// The line a chat window appends for this event.
    pub fn transcript_line(&self) -> Option<String> {
        match self {
            ClientEvent::PeerMessage { from, text } => Some(format!("{from}: {text}")),
            ClientEvent::FileReceived {
                from, file_name, ..
            } => Some(format!("{from}: file received: {file_name}")),
            ClientEvent::MessageSent { text, .. } => Some(format!("me: {text}")),
            ClientEvent::FileSent { file_name, .. } => Some(format!("me: file sent: {file_name}")),
            ClientEvent::LocalError { message, .. } => Some(format!("error: {message}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ClientEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ClientEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_message_transcript_uses_from_prefix() {
        let event = ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "hi:there".to_owned(),
        };
        assert_eq!(event.transcript_line().as_deref(), Some("bob: hi:there"));
        assert_eq!(event.peer(), Some("bob"));
    }

    #[test]
    fn roster_and_close_events_are_not_per_peer() {
        assert_eq!(ClientEvent::RosterChanged(vec!["bob".to_owned()]).peer(), None);
        let closed = ClientEvent::ConnectionClosed {
            reason: CloseReason::ServerClosed,
        };
        assert_eq!(closed.peer(), None);
        assert_eq!(closed.transcript_line(), None);
    }
}
