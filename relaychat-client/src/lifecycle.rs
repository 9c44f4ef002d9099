use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::info;

use crate::event::CloseReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingNickChallenge,
    Ready,
    Closed,
}

/// Shared view of one connection's state. `Closed` is terminal and the first
/// party to close records the reason everyone else observes.
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    state: Arc<watch::Sender<ConnectionState>>,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(ConnectionState::Disconnected)),
            reason: Arc::default(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn advance(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(state = ?next, "connection state changed");
        }
    }

    /// Returns the reason that actually took effect.
    pub(crate) fn close(&self, reason: CloseReason) -> CloseReason {
        let effective = {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(reason).clone()
        };
        self.advance(ConnectionState::Closed);
        effective
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn closed(&self) -> CloseReason {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once closed.
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
        self.close_reason().unwrap_or(CloseReason::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(ConnectionState::Connecting);
        lifecycle.advance(ConnectionState::AwaitingNickChallenge);
        lifecycle.advance(ConnectionState::Ready);
        assert_eq!(lifecycle.state(), ConnectionState::Ready);

        lifecycle.close(CloseReason::ServerClosed);
        lifecycle.advance(ConnectionState::Ready);
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn first_close_reason_wins() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.close(CloseReason::WriteFailed("broken pipe".to_owned()));
        let second = lifecycle.close(CloseReason::Shutdown);
        assert_eq!(first, CloseReason::WriteFailed("broken pipe".to_owned()));
        assert_eq!(second, first);
        assert_eq!(lifecycle.close_reason(), Some(first));
    }

    #[tokio::test]
    async fn closed_wakes_waiters() {
        let lifecycle = Lifecycle::new();
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.closed().await })
        };
        tokio::task::yield_now().await;
        lifecycle.close(CloseReason::ServerClosed);
        let reason = waiter.await.expect("join waiter");
        assert_eq!(reason, CloseReason::ServerClosed);
    }
}
