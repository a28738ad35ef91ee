//! Disk queue settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QueueError, Result};
use crate::DEFAULT_SEGMENT_SIZE;

use super::segments::SEGMENT_HEADER_SIZE;

/// Disk queue tuning
#[derive(Debug, Clone)]
pub struct DiskSettings {
    /// Directory holding the segment files and `state.dat`
    pub path: PathBuf,

    /// Upper bound on bytes held (on disk plus in flight);
    /// zero means unbounded. Must be at least twice `max_segment_size`.
    pub max_buffer_size: u64,

    /// Size at which a segment file is sealed and a new one started
    pub max_segment_size: u64,

    /// How many decoded frames the reader keeps buffered ahead of
    /// consumers
    pub read_ahead: usize,

    /// Base delay for writer/deleter retries after a transient I/O error
    pub retry_interval: Duration,

    /// Cap for the exponential retry backoff
    pub max_retry_interval: Duration,

    /// Fsync after each write request; disabling trades durability for
    /// throughput
    pub sync_writes: bool,
}

impl DiskSettings {
    /// Settings with defaults for everything but the directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_buffer_size: 0,
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            read_ahead: 256,
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(30),
            sync_writes: true,
        }
    }

    /// Check the settings for construction
    ///
    /// A buffer bound below twice the segment size cannot hold a sealed
    /// segment plus a writing one and would wedge; it is a fatal
    /// configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.max_segment_size <= SEGMENT_HEADER_SIZE {
            return Err(QueueError::Settings(format!(
                "segment size ({}) must exceed the segment header size ({})",
                self.max_segment_size, SEGMENT_HEADER_SIZE,
            )));
        }
        if self.max_buffer_size > 0 && self.max_buffer_size < self.max_segment_size * 2 {
            return Err(QueueError::Settings(format!(
                "buffer size ({}) must be at least twice the segment size ({})",
                self.max_buffer_size, self.max_segment_size,
            )));
        }
        if self.read_ahead == 0 {
            return Err(QueueError::Settings("read_ahead must be positive".into()));
        }
        Ok(())
    }

    pub(super) fn directory(&self) -> &Path {
        &self.path
    }

    pub(super) fn state_file_path(&self) -> PathBuf {
        self.path.join("state.dat")
    }

    pub(super) fn segment_path(&self, id: u64) -> PathBuf {
        self.path.join(format!("{id}.seg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(DiskSettings::new("queue").validate().is_ok());
    }

    #[test]
    fn test_buffer_must_hold_two_segments() {
        let mut settings = DiskSettings::new("queue");
        settings.max_segment_size = 1024 * 1024;
        settings.max_buffer_size = 2 * 1024 * 1024 - 1;
        assert!(settings.validate().is_err());

        settings.max_buffer_size = 2 * 1024 * 1024;
        assert!(settings.validate().is_ok());

        // Zero means unbounded and always validates.
        settings.max_buffer_size = 0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_file_names() {
        let settings = DiskSettings::new("/var/lib/skiff/queue");
        assert!(settings.state_file_path().ends_with("state.dat"));
        assert!(settings.segment_path(42).ends_with("42.seg"));
    }
}
