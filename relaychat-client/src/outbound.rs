use std::{io, path::Path, sync::Arc};

use relaychat_core::{CHUNK_SIZE, FrameError, OutboundFrame, encode_frame};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

use crate::{error::ClientError, event::CloseReason, lifecycle::Lifecycle};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub file_name: String,
    pub size: u64,
}

/// The write half of the connection, shared by every conversation.
///
/// Each send holds the lock for its whole frame, including a file body, so
/// frames from different callers never interleave on the wire. Once the
/// connection is closed the writer is dropped and sends fail immediately.
#[derive(Clone)]
pub struct Outbound {
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    lifecycle: Lifecycle,
}

impl Outbound {
    pub(crate) fn new<W>(writer: W, lifecycle: Lifecycle) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Some(Box::new(writer)))),
            lifecycle,
        }
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let frame = encode_frame(&OutboundFrame::MsgTo {
            to: to.to_owned(),
            text: text.to_owned(),
        })
        .map_err(ClientError::Unsendable)?;

        let mut slot = self.acquire().await?;
        let Some(writer) = slot.as_mut() else {
            return Err(ClientError::ConnectionClosed);
        };
        let result = write_and_flush(writer, &frame).await;
        if let Err(err) = result {
            return Err(self.poison(&mut slot, err));
        }
        debug!(peer = %to, bytes = frame.len(), "message sent");
        Ok(())
    }

    pub async fn send_file(&self, to: &str, path: &Path) -> Result<SentFile, ClientError> {
        if self.lifecycle.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                ClientError::local_io(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
        let file = File::open(path)
            .await
            .map_err(|err| ClientError::local_io(path, err))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| ClientError::local_io(path, err))?
            .len();
        let header = encode_frame(&OutboundFrame::SendFileHeader {
            to: to.to_owned(),
            file_name: file_name.clone(),
            size,
        })
        .map_err(ClientError::Unsendable)?;

        self.send_stream(to, &header, file, size, path).await?;
        info!(peer = %to, file = %file_name, size, "file sent");
        Ok(SentFile { file_name, size })
    }

    async fn send_stream<S>(
        &self,
        to: &str,
        header: &[u8],
        mut source: S,
        size: u64,
        path: &Path,
    ) -> Result<(), ClientError>
    where
        S: AsyncRead + Unpin,
    {
        let mut slot = self.acquire().await?;
        let Some(writer) = slot.as_mut() else {
            return Err(ClientError::ConnectionClosed);
        };
        if let Err(err) = writer.write_all(header).await {
            return Err(self.poison(&mut slot, err));
        }

        let mut buf = vec![0_u8; CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = match source.read(&mut buf[..want]).await {
                Ok(0) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file shrank with {remaining} bytes still promised"),
                )),
                other => other,
            };
            let read = match read {
                Ok(read) => read,
                Err(err) => {
                    // The header already promised `size` bytes; the stream
                    // cannot be realigned.
                    warn!(peer = %to, remaining, "local read failed mid-transfer: {err}");
                    self.abandon(
                        &mut slot,
                        CloseReason::WriteFailed(format!("file transfer aborted: {err}")),
                    );
                    return Err(ClientError::local_io(path, err));
                }
            };
            if let Err(err) = writer.write_all(&buf[..read]).await {
                return Err(self.poison(&mut slot, err));
            }
            remaining -= read as u64;
        }

        if let Err(err) = writer.flush().await {
            return Err(self.poison(&mut slot, err));
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Option<BoxedWriter>>, ClientError> {
        if self.lifecycle.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let slot = self.writer.lock().await;
        if slot.is_none() || self.lifecycle.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(slot)
    }

    fn poison(&self, slot: &mut Option<BoxedWriter>, err: io::Error) -> ClientError {
        warn!("write to server failed: {err}");
        self.abandon(slot, CloseReason::WriteFailed(err.to_string()));
        ClientError::Transport(FrameError::Io(err))
    }

    fn abandon(&self, slot: &mut Option<BoxedWriter>, reason: CloseReason) {
        *slot = None;
        self.lifecycle.close(reason);
    }

    /// Drops the writer, sending EOF to the server. Waits for an in-flight
    /// frame to finish first.
    pub(crate) async fn release(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                debug!("writer shutdown failed: {err}");
            }
        }
    }
}

async fn write_and_flush(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
