//! Process configuration: every field spec.md §6 names, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log::LogLevel;

/// The "trigger mode" for listener/connection readiness registration —
/// level-triggered or edge-triggered, and whether the listener and
/// connection sockets can be configured independently. The core only
/// implements edge-triggered one-shot registration (spec.md §4.E); this
/// flag is surfaced for a future level-triggered fallback and otherwise
/// just gets logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrigMode {
    ListenLevelConnLevel,
    ListenLevelConnEdge,
    ListenEdgeConnLevel,
    ListenEdgeConnEdge,
}

impl Default for TrigMode {
    fn default() -> Self {
        TrigMode::ListenEdgeConnEdge
    }
}

/// Top-level server configuration, deserializable from a TOML file.
///
/// Unknown keys are rejected: a typo in an operator's config file should
/// fail loudly at startup, not silently no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// TCP port the listener binds.
    pub port: u16,
    /// Readiness triggering mode for listener/connection sockets.
    pub trig_mode: TrigMode,
    /// Idle timeout for a connection with no activity, in milliseconds.
    pub timeout_ms: u64,
    /// Whether closed sockets linger (`SO_LINGER`) to flush pending writes.
    pub open_linger: bool,
    /// Root directory static file paths are resolved against.
    pub src_dir: PathBuf,
    /// Maximum bytes the request parser will accept for a POST body before
    /// surfacing a 413 (spec.md §6: "request body streaming larger than a
    /// fixed bound" is explicitly out of scope, so this bound is enforced
    /// rather than streamed around).
    pub max_body_bytes: usize,

    /// Number of worker-pool threads.
    pub thread_num: usize,

    /// Whether the async log sink is enabled at all.
    pub open_log: bool,
    /// Minimum level a log line must meet to be recorded.
    pub log_level: LogLevel,
    /// Directory log files are written under.
    pub log_dir: PathBuf,
    /// Depth of the log sink's bounded producer/consumer queue.
    pub log_queue_size: usize,
    /// Lines per file before rotating to the next numbered chunk.
    pub log_max_lines: usize,

    /// SQL collaborator connection parameters (contract only — see
    /// `crate::sql`; no network connection is actually made by this core).
    pub sql_host: String,
    pub sql_port: u16,
    pub sql_user: String,
    pub sql_pwd: String,
    pub sql_db: String,
    /// Number of handles the SQL pool hands out.
    pub connect_pool_num: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            trig_mode: TrigMode::default(),
            timeout_ms: 60_000,
            open_linger: false,
            src_dir: PathBuf::from("./resources"),
            max_body_bytes: 1024 * 1024,

            thread_num: 4,

            open_log: true,
            log_level: LogLevel::Info,
            log_dir: PathBuf::from("./log"),
            log_queue_size: 1024,
            log_max_lines: 50_000,

            sql_host: "localhost".to_string(),
            sql_port: 3306,
            sql_user: String::new(),
            sql_pwd: String::new(),
            sql_db: String::new(),
            connect_pool_num: 8,
        }
    }
}

impl Config {
    /// Loads and validates a config from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("reading {}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.thread_num == 0 {
            return Err(Error::config("thread_num must be at least 1"));
        }
        if self.connect_pool_num == 0 {
            return Err(Error::config("connect_pool_num must be at least 1"));
        }
        if self.log_max_lines == 0 {
            return Err(Error::config("log_max_lines must be at least 1"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = Config::from_toml_str("port = 80\nbogus_field = 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_thread_num() {
        let err = Config::from_toml_str("thread_num = 0\n");
        assert!(err.is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config { port: 9090, thread_num: 2, ..Config::default() };
        let text = toml::to_string(&cfg).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.port, 9090);
        assert_eq!(parsed.thread_num, 2);
    }
}
