use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use relaychat_core::Nickname;
use tracing::debug;

use crate::{
    error::ClientError,
    event::{ClientEvent, EventSink},
    outbound::{Outbound, SentFile},
};

/// Per-peer view over the shared connection.
pub struct Conversation {
    peer: Nickname,
    outbound: Outbound,
    events: EventSink,
}

impl Conversation {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send_text(&self, text: &str) -> Result<(), ClientError> {
        self.outbound.send_text(&self.peer, text).await?;
        self.events.emit(ClientEvent::MessageSent {
            to: self.peer.clone(),
            text: text.to_owned(),
        });
        Ok(())
    }

    pub async fn send_file(&self, path: &Path) -> Result<SentFile, ClientError> {
        let sent = self.outbound.send_file(&self.peer, path).await?;
        self.events.emit(ClientEvent::FileSent {
            to: self.peer.clone(),
            file_name: sent.file_name.clone(),
            size: sent.size,
        });
        Ok(sent)
    }

    pub(crate) fn deliver_message(&self, text: String) {
        self.events.emit(ClientEvent::PeerMessage {
            from: self.peer.clone(),
            text,
        });
    }

    pub(crate) fn deliver_file(&self, file_name: String, path: PathBuf) {
        self.events.emit(ClientEvent::FileReceived {
            from: self.peer.clone(),
            file_name,
            path,
        });
    }
}

/// Conversations keyed by peer nickname, created on first contact in either
/// direction and kept until the connection ends.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Nickname, Arc<Conversation>>>>,
    outbound: Outbound,
    events: EventSink,
}

impl SessionRegistry {
    pub(crate) fn new(outbound: Outbound, events: EventSink) -> Self {
        Self {
            sessions: Arc::default(),
            outbound,
            events,
        }
    }

    /// Atomic lookup-or-create. `ConversationOpened` is emitted under the
    /// lock, so it precedes any other event for the same peer.
    pub fn get_or_create(&self, peer: &str) -> Arc<Conversation> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(peer) {
            return Arc::clone(existing);
        }

        let conversation = Arc::new(Conversation {
            peer: peer.to_owned(),
            outbound: self.outbound.clone(),
            events: self.events.clone(),
        });
        sessions.insert(peer.to_owned(), Arc::clone(&conversation));
        self.events.emit(ClientEvent::ConversationOpened {
            peer: peer.to_owned(),
        });
        debug!(peer, "conversation opened");
        conversation
    }

    pub fn get(&self, peer: &str) -> Option<Arc<Conversation>> {
        self.lock().get(peer).cloned()
    }

    pub fn peers(&self) -> Vec<Nickname> {
        let mut peers: Vec<Nickname> = self.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Nickname, Arc<Conversation>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
