//! drover.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub scaler: ScalerConfig,
    pub broker: BrokerConfig,
    pub tracker: TrackerConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// Time between scaling decisions.
    #[serde(with = "serde_str")]
    pub tick_interval: Duration,
    /// Upper clamp on the worker count.
    pub max_workers: u32,
    /// Response-time target used by the sizing formula.
    #[serde(with = "serde_str")]
    pub target_response_time: Duration,
    /// How long `stop()` waits for a loop to exit before aborting it.
    #[serde(with = "serde_str")]
    pub stop_grace: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_workers: 15,
            target_response_time: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
        }
    }
}

impl ScalerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("scaler.max_workers", "must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::invalid("scaler.tick_interval", "must be positive"));
        }
        if self.target_response_time.is_zero() {
            return Err(ConfigError::invalid(
                "scaler.target_response_time",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    /// Management API port (not the AMQP port).
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub queues: Vec<String>,
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    /// Per-request timeout for one queue.
    #[serde(with = "serde_str")]
    pub metrics_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 15672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            queues: vec!["submit_text_queue".to_string()],
            poll_interval: Duration::from_millis(100),
            metrics_timeout: Duration::from_secs(1),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("broker.host", "must not be empty"));
        }
        if self.queues.is_empty() {
            return Err(ConfigError::invalid("broker.queues", "at least one queue is required"));
        }
        if let Some(q) = self.queues.iter().find(|q| q.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "broker.queues",
                format!("queue name {q:?} is empty"),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("broker.poll_interval", "must be positive"));
        }
        if self.metrics_timeout.is_zero() {
            return Err(ConfigError::invalid("broker.metrics_timeout", "must be positive"));
        }
        Ok(())
    }

    /// `host:port` of the management API. IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Processing-time samples retained for the moving average.
    pub window_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_capacity: 500,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window_capacity == 0 {
            return Err(ConfigError::invalid("tracker.window_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable started for each worker.
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Workers started before the controller takes over.
    pub initial_workers: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            initial_workers: 1,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::invalid("worker.program", "must be set"));
        }
        Ok(())
    }
}

impl DroverConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.scaler.validate()?;
        self.broker.validate()?;
        self.tracker.validate()?;
        self.worker.validate()?;
        if self.worker.initial_workers > self.scaler.max_workers {
            return Err(ConfigError::invalid(
                "worker.initial_workers",
                format!("exceeds scaler.max_workers ({})", self.scaler.max_workers),
            ));
        }
        Ok(())
    }

    /// Scaffold a config that runs `program` as the worker entry point.
    pub fn scaffold(program: &str) -> Self {
        DroverConfig {
            worker: WorkerConfig {
                program: program.to_string(),
                ..WorkerConfig::default()
            },
            ..DroverConfig::default()
        }
    }
}
