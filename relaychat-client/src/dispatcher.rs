use relaychat_core::{FileAnnouncement, FrameError, InboundFrame, Nickname, read_frame};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    event::{ClientEvent, CloseReason, EventSink},
    lifecycle::Lifecycle,
    outbound::Outbound,
    receiver::receive_file,
    roster::Roster,
    session::SessionRegistry,
    staging::StagingDir,
};

/// The single reader of a connection. Runs until a read fails or the
/// connection is closed from elsewhere.
pub(crate) struct Dispatcher<R> {
    pub(crate) reader: R,
    pub(crate) nickname: Nickname,
    pub(crate) sessions: SessionRegistry,
    pub(crate) roster: Roster,
    pub(crate) staging: StagingDir,
    pub(crate) events: EventSink,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) outbound: Outbound,
}

impl<R> Dispatcher<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub(crate) async fn run(mut self) -> CloseReason {
        let lifecycle = self.lifecycle.clone();
        let reason = loop {
            tokio::select! {
                biased;
                reason = lifecycle.closed() => break reason,
                step = self.step() => {
                    if let Err(err) = step {
                        break lifecycle.close(close_reason_for(&err));
                    }
                }
            }
        };

        self.outbound.release().await;
        info!(%reason, sessions = self.sessions.len(), "connection closed");
        self.events.emit(ClientEvent::ConnectionClosed {
            reason: reason.clone(),
        });
        reason
    }

    async fn step(&mut self) -> Result<(), ClientError> {
        let frame = match read_frame(&mut self.reader).await {
            Ok(frame) => frame,
            Err(err) if err.is_recoverable() => {
                warn!("skipping frame: {err}");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match frame {
            InboundFrame::RosterUpdate(update) => {
                let peers = self.roster.replace(update, &self.nickname);
                debug!(count = peers.len(), "roster updated");
                self.events.emit(ClientEvent::RosterChanged(peers));
            }
            InboundFrame::PeerMessage { from, text } => {
                self.sessions.get_or_create(&from).deliver_message(text);
            }
            InboundFrame::FileAnnouncement(announcement) => {
                self.receive(announcement).await?;
            }
            InboundFrame::Unknown { tag } => {
                debug!(%tag, "ignoring unknown tag");
            }
        }
        Ok(())
    }

    async fn receive(&mut self, announcement: FileAnnouncement) -> Result<(), ClientError> {
        debug!(
            peer = %announcement.from,
            file = %announcement.file_name,
            size = announcement.size,
            "receiving file"
        );
        match receive_file(&mut self.reader, &self.staging, &announcement).await {
            Ok(path) => {
                self.sessions
                    .get_or_create(&announcement.from)
                    .deliver_file(announcement.file_name, path);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.events.emit(ClientEvent::LocalError {
                    peer: Some(announcement.from.clone()),
                    message: format!(
                        "could not store {} from {}: {err}",
                        announcement.file_name, announcement.from
                    ),
                });
                Ok(())
            }
        }
    }
}

fn close_reason_for(err: &ClientError) -> CloseReason {
    match err {
        ClientError::Transport(FrameError::ConnectionClosed) => CloseReason::ServerClosed,
        other => CloseReason::ReadFailed(other.to_string()),
    }
}
