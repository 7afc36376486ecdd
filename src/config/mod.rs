//! Configuration module for rtplot-rs
//!
//! [`AppConfig`] gathers every tunable of the data plane. It is persisted as
//! TOML; every section and field has a default, so a partial file is valid.
//!
//! # Location
//!
//! Unless a path is given explicitly, the file lives in the platform config
//! directory under [`APP_ID`]:
//!
//! - **Linux**: `~/.config/rtplot-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/rtplot-rs/config.toml`
//! - **Windows**: `%APPDATA%\rtplot-rs\config.toml`
//!
//! # Example
//!
//! ```toml
//! [stream]
//! capacity = 50000
//! style = "ggplot"
//! dtype = "float32"
//!
//! [reconnect]
//! max_attempts = 10
//! ```

use crate::error::{Result, RtPlotError};
use crate::protocol::{Dtype, HandshakeRecord, MAX_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "rtplot-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default rolling window size, in samples
pub const DEFAULT_CAPACITY: usize = 300_000;

/// Default plot style label
pub const DEFAULT_STYLE: &str = "ggplot";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub event_loop: EventLoopConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub manager: ManagerConfig,
}

impl AppConfig {
    /// Load from an explicit path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RtPlotError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            RtPlotError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the defaults. A missing explicit file is
    /// an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(path),
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    RtPlotError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RtPlotError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| RtPlotError::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject values the data plane cannot run with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(RtPlotError::Config(msg.to_string()));

        if self.stream.capacity == 0 {
            return fail("stream.capacity must be positive");
        }
        if self.stream.capacity > MAX_CAPACITY {
            return fail("stream.capacity exceeds the largest window a consumer accepts");
        }
        if self.stream.style.trim().is_empty() {
            return fail("stream.style must not be empty");
        }
        if self.stream.queue_capacity == 0 {
            return fail("stream.queue_capacity must be positive");
        }
        if self.event_loop.batch_size == 0 {
            return fail("event_loop.batch_size must be positive");
        }
        if self.event_loop.read_chunk_bytes == 0 || self.event_loop.max_reads_per_step == 0 {
            return fail("event_loop read limits must be positive");
        }
        if self.reconnect.max_attempts == 0 {
            return fail("reconnect.max_attempts must be positive");
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return fail("reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms");
        }
        if self.transport.connect_timeout_ms == 0 || self.transport.handshake_timeout_ms == 0 {
            return fail("transport timeouts must be positive");
        }
        if self.manager.spawn_timeout_ms == 0 {
            return fail("manager.spawn_timeout_ms must be positive");
        }
        Ok(())
    }
}

/// What the producer announces in the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Ring buffer capacity on the consumer
    pub capacity: usize,
    pub style: String,
    pub dtype: Dtype,
    /// Bound on messages queued by producer handles before `put_*` blocks
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            style: DEFAULT_STYLE.to_string(),
            dtype: Dtype::Float64,
            queue_capacity: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn handshake_record(&self) -> HandshakeRecord {
        HandshakeRecord::new(self.capacity, self.style.clone(), self.dtype)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Sleep while no worker is registered
    pub idle_interval_ms: u64,
    /// Sleep after a cycle in which no worker made progress
    pub poll_interval_ms: u64,
    /// Messages a producer step may flush
    pub batch_size: usize,
    /// Size of one socket read inside a pump step
    pub read_chunk_bytes: usize,
    /// Socket reads a pump step may make before yielding to the next worker
    pub max_reads_per_step: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 100,
            poll_interval_ms: 1,
            batch_size: 64,
            read_chunk_bytes: 64 * 1024,
            max_reads_per_step: 16,
        }
    }
}

impl EventLoopConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            write_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    /// How long a spawned consumer has to connect back
    pub spawn_timeout_ms: u64,
    pub accept_poll_ms: u64,
    /// Consumer executable; defaults to `rtplot-rs` next to the running binary
    pub consumer_program: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            spawn_timeout_ms: 10_000,
            accept_poll_ms: 10,
            consumer_program: None,
        }
    }
}

impl ManagerConfig {
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.stream.capacity, 300_000);
        assert_eq!(config.stream.style, "ggplot");
        assert_eq!(config.stream.dtype, Dtype::Float64);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.manager.host, "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [stream]
            capacity = 1000
            dtype = "float32"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.capacity, 1000);
        assert_eq!(config.stream.dtype, Dtype::Float32);
        assert_eq!(config.stream.style, "ggplot");
        assert_eq!(config.event_loop, EventLoopConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.stream.capacity = 42;
        config.manager.consumer_program = Some(PathBuf::from("/usr/bin/rtplot-rs"));
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(AppConfig::load_or_default(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.stream.capacity = 0;
        assert!(matches!(config.validate(), Err(RtPlotError::Config(_))));

        let mut config = AppConfig::default();
        config.stream.capacity = MAX_CAPACITY + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.initial_backoff_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.event_loop.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.event_loop.max_reads_per_step = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[stream]\ndtype = \"int8\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(RtPlotError::Config(_))));
        assert!(AppConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_handshake_record_from_stream() {
        let record = StreamConfig::default().handshake_record();
        assert_eq!(record.capacity, DEFAULT_CAPACITY);
        assert_eq!(record.style, DEFAULT_STYLE);
    }
}
