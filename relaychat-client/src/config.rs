use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use relaychat_core::{DEFAULT_HOST, DEFAULT_PORT, Nickname};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub const MAX_NICKNAME_LEN: usize = 64;
pub const MAX_HOST_LEN: usize = 255;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
pub const CONFIG_FILE_NAME: &str = "relaychat.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub nickname: Nickname,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(nickname: impl Into<Nickname>) -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            nickname: nickname.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn server_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What survives between runs, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedClientConfig {
    pub host: String,
    pub port: u16,
    pub nickname: Nickname,
}

/// Nicknames travel inside `USERLIST:a,b` and `from:message` payloads, so the
/// two separators are not allowed in them.
pub fn validate_nickname(nickname: &str) -> Result<(), ClientError> {
    if nickname.trim().is_empty() {
        return Err(ClientError::InvalidNickname(
            "nickname is required".to_owned(),
        ));
    }
    if nickname.trim() != nickname {
        return Err(ClientError::InvalidNickname(
            "nickname must not start or end with whitespace".to_owned(),
        ));
    }
    if nickname.len() > MAX_NICKNAME_LEN {
        return Err(ClientError::InvalidNickname(format!(
            "nickname is too long ({} > {} bytes)",
            nickname.len(),
            MAX_NICKNAME_LEN
        )));
    }
    if let Some(bad) = nickname
        .chars()
        .find(|ch| *ch == ',' || *ch == ':' || ch.is_control())
    {
        return Err(ClientError::InvalidNickname(format!(
            "nickname must not contain {bad:?}"
        )));
    }
    Ok(())
}

pub fn validate_saved_config(cfg: &SavedClientConfig) -> Result<(), ClientError> {
    let mut errors: Vec<String> = Vec::new();

    let host = cfg.host.trim();
    if host.is_empty() {
        errors.push("Host is required.".to_owned());
    } else if host.len() > MAX_HOST_LEN {
        errors.push(format!(
            "Host is too long ({} > {} chars).",
            host.len(),
            MAX_HOST_LEN
        ));
    }

    if cfg.port == 0 {
        errors.push("Port must be between 1 and 65535.".to_owned());
    }

    if let Err(err) = validate_nickname(&cfg.nickname) {
        errors.push(format!("{err}."));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ClientError::Config(errors.join(" ")))
    }
}

/// `RELAYCHAT_CONFIG_DIR` overrides the directory; the default is the working
/// directory, next to the staging folder.
pub fn config_path() -> PathBuf {
    std::env::var_os("RELAYCHAT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

pub fn load_saved_config(path: &Path) -> Result<Option<SavedClientConfig>, ClientError> {
    if !path.exists() {
        return Ok(None);
    }

    let data = std::fs::read_to_string(path).map_err(|err| ClientError::local_io(path, err))?;
    let cfg: SavedClientConfig = serde_json::from_str(&data).map_err(|err| {
        ClientError::Config(format!("failed to parse {}: {err}", path.display()))
    })?;

    validate_saved_config(&cfg)?;
    Ok(Some(cfg))
}

/// Writes to a sibling temp file first so a crash never leaves a torn config.
pub fn save_saved_config(path: &Path, cfg: &SavedClientConfig) -> Result<(), ClientError> {
    validate_saved_config(cfg)?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|err| ClientError::local_io(dir, err))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg)
        .map_err(|err| ClientError::Config(format!("failed to serialize config: {err}")))?;
    std::fs::write(&tmp_path, payload.as_bytes())
        .map_err(|err| ClientError::local_io(&tmp_path, err))?;
    std::fs::rename(&tmp_path, path).map_err(|err| ClientError::local_io(path, err))?;
    Ok(())
}
