use std::sync::{Arc, Mutex, PoisonError};

use relaychat_core::Nickname;

/// The latest peer list from the server. Each update replaces the previous
/// one wholesale.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: Arc<Mutex<Vec<Nickname>>>,
}

impl Roster {
    /// Drops the local nickname, empty entries and repeats, then stores and
    /// returns the result.
    pub(crate) fn replace(&self, update: Vec<Nickname>, local: &str) -> Vec<Nickname> {
        let mut peers: Vec<Nickname> = Vec::with_capacity(update.len());
        for name in update {
            if name.is_empty() || name == local || peers.contains(&name) {
                continue;
            }
            peers.push(name);
        }
        *self.peers.lock().unwrap_or_else(PoisonError::into_inner) = peers.clone();
        peers
    }

    pub fn snapshot(&self) -> Vec<Nickname> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
