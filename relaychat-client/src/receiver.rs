use std::{io, path::PathBuf};

use relaychat_core::{CHUNK_SIZE, FileAnnouncement, FrameError};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};

use crate::{error::ClientError, staging::StagingDir};

/// Removes the staged file on drop unless the transfer completed, so a
/// failed or cancelled receive leaves nothing behind.
struct PendingFileTransfer<'a> {
    origin: &'a str,
    declared: u64,
    destination: PathBuf,
    copied: u64,
    completed: bool,
}

impl PendingFileTransfer<'_> {
    fn remaining(&self) -> u64 {
        self.declared - self.copied
    }
}

impl Drop for PendingFileTransfer<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        match std::fs::remove_file(&self.destination) {
            Ok(()) => debug!(
                peer = %self.origin,
                copied = self.copied,
                path = %self.destination.display(),
                "removed incomplete staged file"
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.destination.display(),
                "could not remove incomplete staged file: {err}"
            ),
        }
    }
}

/// Streams the payload that follows a `SENDFILE` header into the staging
/// directory and returns the staged path.
///
/// Exactly `announcement.size` bytes are consumed from `reader` unless the
/// connection fails. A local write failure keeps draining the payload so the
/// next frame still starts on a tag, then reports [`ClientError::LocalIo`].
pub async fn receive_file<R>(
    reader: &mut R,
    staging: &StagingDir,
    announcement: &FileAnnouncement,
) -> Result<PathBuf, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut transfer = PendingFileTransfer {
        origin: &announcement.from,
        declared: announcement.size,
        destination: staging.allocate(&announcement.from, &announcement.file_name),
        copied: 0,
        completed: false,
    };

    let mut local_failure: Option<io::Error> = None;
    let mut sink = match File::create(&transfer.destination).await {
        Ok(file) => Some(file),
        Err(err) => {
            local_failure = Some(err);
            None
        }
    };

    let mut buf = vec![0_u8; CHUNK_SIZE];
    while transfer.remaining() > 0 {
        let want = transfer.remaining().min(CHUNK_SIZE as u64) as usize;
        let read = match reader.read(&mut buf[..want]).await {
            Ok(0) => Err(FrameError::ConnectionClosed),
            Ok(read) => Ok(read),
            Err(err) => Err(FrameError::Io(err)),
        };
        let read = match read {
            Ok(read) => read,
            Err(err) => {
                warn!(
                    peer = %transfer.origin,
                    copied = transfer.copied,
                    declared = transfer.declared,
                    "file payload cut short: {err}"
                );
                drop(sink);
                return Err(err.into());
            }
        };

        if let Some(file) = sink.as_mut() {
            if let Err(err) = file.write_all(&buf[..read]).await {
                local_failure = Some(err);
                sink = None;
            }
        }
        transfer.copied += read as u64;
    }

    if let Some(mut file) = sink {
        if let Err(err) = file.flush().await {
            local_failure = Some(err);
        }
    }

    if let Some(err) = local_failure {
        warn!(
            peer = %transfer.origin,
            path = %transfer.destination.display(),
            "could not stage received file: {err}"
        );
        return Err(ClientError::local_io(transfer.destination.clone(), err));
    }

    info!(
        peer = %transfer.origin,
        bytes = transfer.copied,
        path = %transfer.destination.display(),
        "file received"
    );
    transfer.completed = true;
    Ok(transfer.destination.clone())
}
