use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info};

use crate::error::ClientError;

pub const DEFAULT_STAGING_DIR: &str = "./tempDownloads";
const MAX_FILE_NAME_CHARS: usize = 128;

/// Private scratch directory for received payloads.
///
/// Emptied once when the client starts; after that files are only added.
#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    /// Creates `root` if needed and deletes every entry inside it.
    pub fn prepare(root: impl AsRef<Path>) -> Result<Self, ClientError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|err| ClientError::local_io(root, err))?;
        let root = std::fs::canonicalize(root).map_err(|err| ClientError::local_io(root, err))?;

        let entries = std::fs::read_dir(&root).map_err(|err| ClientError::local_io(&root, err))?;
        let mut removed = 0_usize;
        for entry in entries {
            let entry = entry.map_err(|err| ClientError::local_io(&root, err))?;
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map_err(|err| ClientError::local_io(&path, err))?
                .is_dir();
            let result = if is_dir {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|err| ClientError::local_io(&path, err))?;
            removed += 1;
        }

        info!(root = %root.display(), removed, "staging directory ready");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Two transfers of the same file from the same peer within one
    /// millisecond land on the same path; the later one wins.
    pub(crate) fn allocate(&self, from: &str, file_name: &str) -> PathBuf {
        let path = self.root.join(format!(
            "{}_{}_{}",
            sanitize_file_name(from),
            now_unix_ms(),
            sanitize_file_name(file_name)
        ));
        debug!(path = %path.display(), "allocated staging path");
        path
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return "file.bin".to_owned();
    }
    trimmed
        .chars()
        .take(MAX_FILE_NAME_CHARS)
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect()
}

/// `dir/name`, or `dir/stem (n).ext` for the first free `n` when taken.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let safe = sanitize_file_name(file_name);
    let candidate = dir.join(&safe);
    if !candidate.exists() {
        return candidate;
    }

    let safe_path = Path::new(&safe);
    let stem = safe_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = safe_path.extension().and_then(|s| s.to_str());
    for i in 1..=200 {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{stem} ({i}).{ext}")),
            None => dir.join(format!("{stem} ({i})")),
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("{stem}_{}", now_unix_ms()))
}

/// Copies a staged file somewhere the user picked. Failures stay local.
pub async fn save_received_file(staged: &Path, dest: &Path) -> Result<u64, ClientError> {
    if !tokio::fs::try_exists(staged).await.unwrap_or(false) {
        return Err(ClientError::local_io(
            staged,
            std::io::Error::new(std::io::ErrorKind::NotFound, "staged file is gone"),
        ));
    }
    let copied = tokio::fs::copy(staged, dest)
        .await
        .map_err(|err| ClientError::local_io(dest, err))?;
    info!(dest = %dest.display(), bytes = copied, "saved received file");
    Ok(copied)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
