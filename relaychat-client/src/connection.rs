use std::{path::Path, sync::Arc};

use relaychat_core::{FrameError, OutboundFrame, TAG_SUBMIT_NICK, encode_frame, read_text};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::timeout,
};
use tracing::{error, info, warn};

use crate::{
    config::{ClientConfig, validate_nickname},
    dispatcher::Dispatcher,
    error::ClientError,
    event::{CloseReason, EventSink},
    lifecycle::{ConnectionState, Lifecycle},
    outbound::{Outbound, SentFile},
    roster::Roster,
    session::{Conversation, SessionRegistry},
    staging::StagingDir,
};

/// A connected, handshaken client. The dispatcher runs on its own task until
/// the connection ends; [`ClientHandle`]s stay usable from any thread.
pub struct Client {
    handle: ClientHandle,
    dispatcher: JoinHandle<CloseReason>,
}

#[derive(Clone)]
pub struct ClientHandle {
    nickname: Arc<str>,
    sessions: SessionRegistry,
    roster: Roster,
    lifecycle: Lifecycle,
}

impl Client {
    pub async fn connect(
        config: &ClientConfig,
        staging: StagingDir,
        events: EventSink,
    ) -> Result<Self, ClientError> {
        validate_nickname(&config.nickname)?;
        let lifecycle = Lifecycle::new();
        lifecycle.advance(ConnectionState::Connecting);

        let addr = config.server_addr();
        info!(%addr, nickname = %config.nickname, "connecting");
        let stream = match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!(%addr, "connect failed: {err}");
                return Err(FrameError::Io(err).into());
            }
            Err(_) => {
                error!(%addr, "connect timed out after {:?}", config.connect_timeout);
                return Err(ClientError::ConnectTimeout {
                    addr,
                    after: config.connect_timeout,
                });
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {err}");
        }

        let (reader, writer) = stream.into_split();
        Self::handshake(lifecycle, reader, writer, &config.nickname, staging, events).await
    }

    /// Runs the nickname handshake over an already connected stream pair.
    pub async fn establish<R, W>(
        reader: R,
        writer: W,
        nickname: &str,
        staging: StagingDir,
        events: EventSink,
    ) -> Result<Self, ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        validate_nickname(nickname)?;
        let lifecycle = Lifecycle::new();
        lifecycle.advance(ConnectionState::Connecting);
        Self::handshake(lifecycle, reader, writer, nickname, staging, events).await
    }

    async fn handshake<R, W>(
        lifecycle: Lifecycle,
        mut reader: R,
        mut writer: W,
        nickname: &str,
        staging: StagingDir,
        events: EventSink,
    ) -> Result<Self, ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        lifecycle.advance(ConnectionState::AwaitingNickChallenge);

        let challenge = match read_text(&mut reader).await {
            Ok(challenge) => challenge,
            Err(err) => {
                lifecycle.close(CloseReason::ReadFailed(err.to_string()));
                return Err(err.into());
            }
        };
        if challenge != TAG_SUBMIT_NICK {
            error!(received = %challenge, "unexpected handshake frame");
            lifecycle.close(CloseReason::ReadFailed(format!(
                "expected {TAG_SUBMIT_NICK}, got {challenge:?}"
            )));
            return Err(ClientError::HandshakeViolation {
                expected: TAG_SUBMIT_NICK,
                received: challenge,
            });
        }

        let frame = encode_frame(&OutboundFrame::Nickname(nickname.to_owned()))
            .map_err(ClientError::Unsendable)?;
        let submitted: std::io::Result<()> = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = submitted {
            lifecycle.close(CloseReason::WriteFailed(err.to_string()));
            return Err(FrameError::Io(err).into());
        }
        lifecycle.advance(ConnectionState::Ready);
        info!(%nickname, "nickname submitted");

        let outbound = Outbound::new(writer, lifecycle.clone());
        let sessions = SessionRegistry::new(outbound.clone(), events.clone());
        let roster = Roster::default();

        let dispatcher = Dispatcher {
            reader,
            nickname: nickname.to_owned(),
            sessions: sessions.clone(),
            roster: roster.clone(),
            staging,
            events,
            lifecycle: lifecycle.clone(),
            outbound,
        };
        let dispatcher = tokio::spawn(dispatcher.run());

        Ok(Self {
            handle: ClientHandle {
                nickname: Arc::from(nickname),
                sessions,
                roster,
                lifecycle,
            },
            dispatcher,
        })
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Waits for the dispatcher to finish and returns why the connection
    /// ended.
    pub async fn wait(self) -> CloseReason {
        match self.dispatcher.await {
            Ok(reason) => reason,
            Err(err) => {
                error!("dispatcher task failed: {err}");
                self.handle
                    .lifecycle
                    .close(CloseReason::ReadFailed(err.to_string()))
            }
        }
    }
}

impl ClientHandle {
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.subscribe()
    }

    pub fn roster(&self) -> Vec<String> {
        self.roster.snapshot()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn conversation(&self, peer: &str) -> Arc<Conversation> {
        self.sessions.get_or_create(peer)
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<(), ClientError> {
        if self.lifecycle.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        self.conversation(to).send_text(text).await
    }

    pub async fn send_file(&self, to: &str, path: &Path) -> Result<SentFile, ClientError> {
        if self.lifecycle.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        self.conversation(to).send_file(path).await
    }

    /// Closes the connection. The dispatcher reports `ConnectionClosed` once
    /// it has let go of the socket.
    pub fn shutdown(&self) {
        self.lifecycle.close(CloseReason::Shutdown);
    }
}
