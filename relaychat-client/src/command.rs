use std::path::PathBuf;

use relaychat_core::Nickname;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    connection::ClientHandle,
    error::ClientError,
    event::{ClientEvent, EventSink},
};

/// Requests from a UI thread that does not run on the tokio runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    SendText { to: Nickname, text: String },
    SendFile { to: Nickname, path: PathBuf },
    Shutdown,
}

/// Executes commands one at a time, in the order they were queued. Failures
/// are reported as `LocalError` events rather than ending the loop.
pub async fn run_commands(
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    handle: ClientHandle,
    events: EventSink,
) {
    while let Some(command) = commands.recv().await {
        match command {
            ClientCommand::SendText { to, text } => {
                if text.trim().is_empty() {
                    continue;
                }
                if let Err(err) = handle.send_text(&to, &text).await {
                    report(&events, to, "send failed", err);
                }
            }
            ClientCommand::SendFile { to, path } => {
                if let Err(err) = handle.send_file(&to, &path).await {
                    report(&events, to, "send file failed", err);
                }
            }
            ClientCommand::Shutdown => {
                info!("shutdown requested");
                handle.shutdown();
                break;
            }
        }
    }
}

fn report(events: &EventSink, peer: Nickname, context: &str, err: ClientError) {
    warn!(%peer, fatal = err.is_fatal(), "{context}: {err}");
    events.emit(ClientEvent::LocalError {
        peer: Some(peer),
        message: format!("{context}: {err}"),
    });
}
