//! Cross-field configuration validation
//!
//! Catches unusable combinations at load time, before any queue or
//! pipeline is constructed.

use crate::error::{ConfigError, Result};
use crate::{Config, QueueType};

pub(crate) fn validate_config(config: &Config) -> Result<()> {
    let queue = &config.queue;

    if queue.mem.events == 0 {
        return Err(ConfigError::invalid_value(
            "queue.mem",
            "events",
            "must be positive",
        ));
    }
    if queue.mem.flush.min_events == 0 {
        return Err(ConfigError::invalid_value(
            "queue.mem",
            "flush.min_events",
            "must be positive",
        ));
    }

    if queue.queue_type == QueueType::Disk {
        if queue.disk.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid_value(
                "queue.disk",
                "path",
                "must not be empty",
            ));
        }
        if queue.disk.segment_size == 0 {
            return Err(ConfigError::invalid_value(
                "queue.disk",
                "segment_size",
                "must be positive",
            ));
        }
        // The queue itself checks this again at construction; failing
        // at config load gives a better error position.
        if queue.disk.max_size > 0 && queue.disk.max_size < queue.disk.segment_size * 2 {
            return Err(ConfigError::invalid_value(
                "queue.disk",
                "max_size",
                format!(
                    "must be at least twice segment_size ({} < 2 * {})",
                    queue.disk.max_size, queue.disk.segment_size
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_zero_events_rejected() {
        let err = Config::from_str("[queue.mem]\nevents = 0").unwrap_err();
        assert!(err.to_string().contains("events"));
    }

    #[test]
    fn test_small_disk_buffer_rejected() {
        let err = Config::from_str(
            "[queue]\ntype = \"disk\"\n[queue.disk]\nmax_size = \"150MiB\"\nsegment_size = \"100MiB\"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_size"));
    }

    #[test]
    fn test_unbounded_disk_buffer_allowed() {
        let config = Config::from_str(
            "[queue]\ntype = \"disk\"\n[queue.disk]\nmax_size = 0",
        )
        .unwrap();
        assert_eq!(config.queue.disk.max_size, 0);
    }
}
