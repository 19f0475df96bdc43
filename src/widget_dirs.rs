//! Application directory paths for the widget host.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! # Environment Overrides
//!
//! - `AVATAR_CHAT_DATA_DIR` overrides [`data_dir`]
//! - `AVATAR_CHAT_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "avatar-chat";

/// Application data root directory.
///
/// Holds the persistent local store (auth token, username, chat history).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AVATAR_CHAT_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/avatar-chat-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("AVATAR_CHAT_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/avatar-chat-config"))
}

/// `config.toml` inside [`config_dir`].
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// `store.json` inside [`data_dir`].
#[must_use]
pub fn store_file() -> PathBuf {
    data_dir().join("store.json")
}
