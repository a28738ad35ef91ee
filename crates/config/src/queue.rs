//! Queue configuration
//!
//! Selects and tunes the buffering queue. The memory queue is the
//! default; the disk queue trades latency for durability.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use skiff_queue::{DiskSettings, MemorySettings};

use crate::bytes;
use crate::error::{ConfigError, Result};

/// Which queue implementation buffers events
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Bounded in-memory ring (default)
    #[default]
    Mem,
    /// Segmented on-disk log
    Disk,
}

/// Queue section
///
/// # Example
///
/// ```toml
/// [queue]
/// type = "disk"
///
/// [queue.disk]
/// path = "data/queue"
/// max_size = "1GiB"
/// segment_size = "100MiB"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue implementation to use
    #[serde(rename = "type")]
    pub queue_type: QueueType,

    /// Memory queue tuning
    pub mem: MemQueueConfig,

    /// Disk queue tuning
    pub disk: DiskQueueConfig,
}

/// Memory queue tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemQueueConfig {
    /// Maximum number of buffered events
    pub events: usize,

    /// Batch flush behavior
    pub flush: FlushConfig,
}

impl Default for MemQueueConfig {
    fn default() -> Self {
        Self {
            events: 4096,
            flush: FlushConfig::default(),
        }
    }
}

/// Flush behavior of the memory queue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Number of events a get request fills up to before the flush
    /// timeout forces a short batch
    pub min_events: usize,

    /// How long a partial batch waits for more events; zero flushes as
    /// soon as anything is available
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            min_events: 1024,
            timeout: Duration::ZERO,
        }
    }
}

/// Disk queue tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskQueueConfig {
    /// Directory for segment files and the position checkpoint
    pub path: PathBuf,

    /// Total bytes the queue may hold; zero is unbounded.
    /// Must be at least twice `segment_size`.
    #[serde(deserialize_with = "bytes::deserialize")]
    pub max_size: u64,

    /// Segment file size before rolling to a new one
    #[serde(deserialize_with = "bytes::deserialize")]
    pub segment_size: u64,

    /// Base delay for retrying failed writes and deletes
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Fsync after each write request
    pub sync_writes: bool,
}

impl Default for DiskQueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("queue"),
            max_size: 1 << 30,
            segment_size: 100 * (1 << 20),
            retry_interval: Duration::from_secs(1),
            sync_writes: true,
        }
    }
}

/// Resolved queue settings the pipeline consumes
#[derive(Debug, Clone)]
pub enum QueueSettings {
    Memory(MemorySettings),
    Disk(DiskSettings),
}

impl QueueConfig {
    /// Resolve the configured queue into constructor settings
    pub fn settings(&self) -> Result<QueueSettings> {
        match self.queue_type {
            QueueType::Mem => Ok(QueueSettings::Memory(MemorySettings {
                events: self.mem.events,
                // The broker never hands out more than the flush target
                // in one batch.
                max_get_request: self.mem.flush.min_events.min(self.mem.events),
                flush_timeout: self.mem.flush.timeout,
            })),
            QueueType::Disk => {
                let mut settings = DiskSettings::new(self.disk.path.clone());
                settings.max_buffer_size = self.disk.max_size;
                settings.max_segment_size = self.disk.segment_size;
                settings.retry_interval = self.disk.retry_interval;
                settings.sync_writes = self.disk.sync_writes;
                settings.validate().map_err(|e| {
                    ConfigError::invalid_value("queue.disk", "max_size", e.to_string())
                })?;
                Ok(QueueSettings::Disk(settings))
            }
        }
    }
}
