use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{LumenError, Result};

/// Top-level engine configuration, usually loaded from a YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub dist: DistConfig,
    pub plugins: PluginConfig,
    pub log: LogConfig,
}

/// Local scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of local executor threads (0 = number of CPUs)
    pub threads: usize,
    /// Minimum interval between two progress log lines
    pub progress_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            progress_interval_ms: 500,
        }
    }
}

impl SchedulerConfig {
    /// Resolved parallelism degree
    pub fn parallelism(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Coordinator/agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    // Transport
    /// Address the coordinator listens on
    pub bind_address: String,
    /// Capacity of every in-process message channel
    pub channel_capacity: usize,
    /// Largest accepted wire frame in bytes
    pub max_frame_bytes: usize,

    // Sync
    /// Compress sync payloads with zstd
    pub compress_sync: bool,
    /// zstd compression level
    pub compression_level: i32,
    /// How long to wait for every worker to acknowledge a sync
    pub sync_timeout_ms: u64,

    // Gather
    /// Window for one round of gather replies
    pub gather_timeout_ms: u64,
    /// Number of additional gather rounds for silent workers
    pub gather_retries: u32,
    /// Initial delay before re-requesting a gather
    pub retry_delay_ms: u64,
    /// Maximum delay between gather rounds
    pub max_retry_delay_ms: u64,
    /// Backoff multiplier between gather rounds
    pub retry_backoff_multiplier: f64,

    // Dispatch
    /// How long dispatch waits for a worker when none is connected
    pub worker_wait_timeout_ms: u64,
    /// How many times a single range may be re-queued after disconnects
    pub max_range_retries: u32,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            channel_capacity: 256,
            max_frame_bytes: 512 * 1024 * 1024, // 512MB

            compress_sync: true,
            compression_level: 3,
            sync_timeout_ms: 60_000,

            gather_timeout_ms: 30_000,
            gather_retries: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            retry_backoff_multiplier: 2.0,

            worker_wait_timeout_ms: 30_000,
            max_range_retries: 3,
        }
    }
}

impl DistConfig {
    /// Create a new builder for DistConfig
    pub fn builder() -> DistConfigBuilder {
        DistConfigBuilder::new()
    }

    /// Configuration with short timeouts for tests and local runs
    pub fn development() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            channel_capacity: 64,
            sync_timeout_ms: 2_000,
            gather_timeout_ms: 500,
            gather_retries: 1,
            retry_delay_ms: 20,
            max_retry_delay_ms: 100,
            worker_wait_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    /// Address a worker on this host dials to reach `bind_address`.
    /// Wildcard hosts are replaced by the loopback address.
    pub fn connect_address(&self) -> String {
        match self.bind_address.rsplit_once(':') {
            Some(("0.0.0.0", port)) => format!("127.0.0.1:{}", port),
            Some(("[::]", port)) => format!("[::1]:{}", port),
            _ => self.bind_address.clone(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn worker_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_wait_timeout_ms)
    }

    /// Delay before gather round `attempt` (1-based), with up to 10% jitter
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .retry_backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let base = (self.retry_delay_ms as f64 * exp).min(self.max_retry_delay_ms as f64);
        let jitter = base * 0.1 * fastrand::f64();
        Duration::from_millis((base + jitter) as u64)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(LumenError::configuration_field(
                "channel_capacity must be greater than 0",
                "channel_capacity",
            ));
        }
        if self.max_frame_bytes < 1024 {
            return Err(LumenError::configuration_field(
                "max_frame_bytes must be at least 1024",
                "max_frame_bytes",
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(LumenError::configuration_field(
                "compression_level must be within 1..=22",
                "compression_level",
            ));
        }
        if self.gather_timeout_ms == 0 || self.sync_timeout_ms == 0 {
            return Err(LumenError::configuration(
                "sync and gather timeouts must be greater than 0",
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(LumenError::configuration_field(
                "retry_backoff_multiplier must be >= 1.0",
                "retry_backoff_multiplier",
            ));
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(LumenError::configuration_field(
                "retry_delay_ms cannot exceed max_retry_delay_ms",
                "retry_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Builder for DistConfig
pub struct DistConfigBuilder {
    config: DistConfig,
}

impl DistConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: DistConfig::default(),
        }
    }

    /// Set the listening address
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Enable/disable sync compression
    pub fn compress_sync(mut self, enabled: bool) -> Self {
        self.config.compress_sync = enabled;
        self
    }

    /// Set sync and gather windows
    pub fn timeouts(mut self, sync: Duration, gather: Duration) -> Self {
        self.config.sync_timeout_ms = sync.as_millis() as u64;
        self.config.gather_timeout_ms = gather.as_millis() as u64;
        self
    }

    /// Set gather retry policy
    pub fn gather_retries(mut self, retries: u32, initial: Duration, max: Duration) -> Self {
        self.config.gather_retries = retries;
        self.config.retry_delay_ms = initial.as_millis() as u64;
        self.config.max_retry_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set how long dispatch waits for workers
    pub fn worker_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.worker_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how often a range may be re-queued
    pub fn max_range_retries(mut self, retries: u32) -> Self {
        self.config.max_range_retries = retries;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DistConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for DistConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Native module loading configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Directories scanned for modules at startup
    pub directories: Vec<PathBuf>,
    /// Individual modules (path without platform suffix)
    pub modules: Vec<PathBuf>,
    /// Append `-debug` to module names before loading
    pub debug_suffix: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LumenError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.dist.validate()?;
        crate::core::logging::parse_level(&self.log.level)?;
        Ok(())
    }
}
