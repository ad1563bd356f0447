//! JSON configuration for the two binaries.
//!
//! Required keys fail the load; optional keys carry defaults. Each binary
//! resolves its config path from `--config` or a short list of conventional
//! locations.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::packet::MAX_BINARY_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: i64,
    #[serde(default = "default_file_chunk_size")]
    pub file_chunk_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: i64,
    // Shell settings, passed through to the UI layer untouched.
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default)]
    pub emoji_font_path: String,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_max_clients() -> usize {
    1000
}

fn default_history_page_size() -> i64 {
    100
}

fn default_file_chunk_size() -> i64 {
    65536
}

fn default_window_width() -> u32 {
    1024
}

fn default_window_height() -> u32 {
    720
}

pub fn load_server_config(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: ServerConfig = serde_json::from_str(&text)?;

    if config.port == 0 {
        return Err(ConfigError::Invalid("port must be non-zero".into()));
    }
    if config.max_clients == 0 {
        return Err(ConfigError::Invalid("max_clients must be positive".into()));
    }
    if config.history_page_size <= 0 {
        return Err(ConfigError::Invalid(
            "history_page_size must be positive".into(),
        ));
    }
    if config.file_chunk_size <= 0 || config.file_chunk_size > MAX_BINARY_SIZE as i64 {
        return Err(ConfigError::Invalid(format!(
            "file_chunk_size must be in 1..={MAX_BINARY_SIZE}"
        )));
    }
    Ok(config)
}

pub fn load_client_config(path: impl AsRef<Path>) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: ClientConfig = serde_json::from_str(&text)?;

    if config.server_port == 0 {
        return Err(ConfigError::Invalid("server_port must be non-zero".into()));
    }
    if config.history_page_size <= 0 {
        return Err(ConfigError::Invalid(
            "history_page_size must be positive".into(),
        ));
    }
    if config.window_width == 0 || config.window_height == 0 {
        return Err(ConfigError::Invalid(
            "window dimensions must be positive".into(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn server_config_defaults_apply() {
        let (_dir, path) = write_config(
            r#"{"bind_host":"0.0.0.0","port":7500,"data_dir":"/tmp/parlor","db_path":"/tmp/parlor/parlor.db"}"#,
        );
        let config = load_server_config(&path).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.history_page_size, 100);
        assert_eq!(config.file_chunk_size, 65536);
    }

    #[test]
    fn missing_required_key_fails() {
        let (_dir, path) = write_config(r#"{"bind_host":"0.0.0.0","port":7500}"#);
        assert!(matches!(
            load_server_config(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn non_positive_chunk_size_rejected() {
        let (_dir, path) = write_config(
            r#"{"bind_host":"0.0.0.0","port":7500,"data_dir":"/tmp/p","db_path":"/tmp/p.db","file_chunk_size":0}"#,
        );
        assert!(matches!(
            load_server_config(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn client_config_round_trip() {
        let (_dir, path) = write_config(
            r#"{"server_host":"127.0.0.1","server_port":7500,"data_dir":"/tmp/parlor-client","history_page_size":50}"#,
        );
        let config = load_client_config(&path).unwrap();
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.history_page_size, 50);
        assert_eq!(config.window_width, 1024);
    }
}
