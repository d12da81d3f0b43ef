//! Pipe names and configuration paths
//!
//! Windows: the extension listens on `\\.\pipe\vibedbg_debug`
//! Unix: the same name is resolved to a socket under the runtime dir, which
//! lets the bridge talk to a local stand-in for the extension.

use std::io;
use std::path::PathBuf;

/// Name used for project directories
const APP_NAME: &str = "windbg-mcp";

/// Default pipe name the WinDbg extension listens on
pub const DEFAULT_PIPE_NAME: &str = "vibedbg_debug";

/// Prefix Windows uses for the named pipe namespace
const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Normalize a configured pipe name to its bare form.
///
/// Accepts both `vibedbg_debug` and `\\.\pipe\vibedbg_debug`.
pub fn bare_pipe_name(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.get(..PIPE_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(PIPE_PREFIX) => &trimmed[PIPE_PREFIX.len()..],
        _ => trimmed,
    }
}

/// Full Windows path of a pipe, used in messages and logs
pub fn display_pipe_path(name: &str) -> String {
    format!("{}{}", PIPE_PREFIX, bare_pipe_name(name))
}

/// Socket path a pipe name maps to on Unix
///
/// `$XDG_RUNTIME_DIR/<name>.sock` or `<tmp>/<name>.sock`.
#[cfg(unix)]
pub fn socket_path(name: &str) -> PathBuf {
    let file = format!("{}.sock", bare_pipe_name(name));
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => PathBuf::from(runtime_dir).join(file),
        _ => std::env::temp_dir().join(file),
    }
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/windbg-mcp/`
/// - macOS: `~/Library/Application Support/windbg-mcp/`
/// - Windows: `%APPDATA%\windbg-mcp\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    match log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Ok(Some(dir))
        }
        None => Ok(None),
    }
}
