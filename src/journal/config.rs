//! Journal configuration.
//!
//! [`JournalConfig`] is plain serde data so it can be embedded in a larger
//! application config. Every field has a default; a JSON document only needs
//! to name what it changes:
//!
//! ```
//! use journal_rs::{FlushStrategy, JournalConfig};
//!
//! let config = JournalConfig::from_json(
//!     r#"{ "directory": "/var/lib/raft", "flush": { "type": "delayed", "delay_ms": 5, "batch_size": 64 } }"#,
//! ).unwrap();
//! assert_eq!(config.index_density, 100);
//! assert!(matches!(config.flush, FlushStrategy::Delayed { delay_ms: 5, .. }));
//! ```

use super::error::JournalError;
use super::record::FRAME_OVERHEAD;
use super::segment::DESCRIPTOR_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default maximum segment size: 128 MiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 128 * 1024 * 1024;

/// Default number of records per sparse-index entry.
pub const DEFAULT_INDEX_DENSITY: u64 = 100;

/// Smallest accepted segment size: a descriptor plus one empty record.
pub const MIN_SEGMENT_SIZE: u64 = (DESCRIPTOR_SIZE + FRAME_OVERHEAD) as u64;

/// When appended records are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlushStrategy {
    /// Flush synchronously after every append.
    #[default]
    Direct,
    /// Never flush on append; rely on the OS or explicit `flush` calls.
    NoOp,
    /// Batch flush requests and flush after `delay_ms`, or immediately once
    /// `batch_size` requests are pending (`0` disables the batch trigger).
    Delayed {
        /// Delay between the first pending request and the flush.
        delay_ms: u64,
        /// Pending requests that force an immediate flush.
        #[serde(default)]
        batch_size: usize,
    },
}

impl FlushStrategy {
    /// Delayed strategy from a [`Duration`].
    #[must_use]
    pub fn delayed(delay: Duration, batch_size: usize) -> Self {
        FlushStrategy::Delayed {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            batch_size,
        }
    }
}

/// What to do when startup finds a damaged record that was never flushed.
///
/// Damage at or below the last flushed index always fails startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Refuse to open the journal.
    Fail,
    /// Drop everything from the damaged record on and continue.
    #[default]
    Truncate,
}

/// Settings of a segmented journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the segment files.
    pub directory: PathBuf,
    /// File name prefix of the segments.
    pub name: String,
    /// Pre-allocated size of each segment file in bytes.
    pub max_segment_size: u64,
    /// Records per sparse-index entry.
    pub index_density: u64,
    /// Flush strategy applied after appends.
    pub flush: FlushStrategy,
    /// Handling of damaged, unflushed records found at startup.
    pub recovery: RecoveryPolicy,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./journal"),
            name: "journal".to_string(),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            index_density: DEFAULT_INDEX_DENSITY,
            flush: FlushStrategy::Direct,
            recovery: RecoveryPolicy::Truncate,
        }
    }
}

impl JournalConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if the JSON is malformed or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, JournalError> {
        let config: Self = serde_json::from_str(json).map_err(|e| JournalError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if serialization fails.
    pub fn to_json(&self) -> Result<String, JournalError> {
        serde_json::to_string_pretty(self).map_err(|e| JournalError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Check the settings for values the journal cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), JournalError> {
        let invalid = |message: String| Err(JournalError::InvalidConfig { message });

        if self.name.is_empty() {
            return invalid("journal name must not be empty".to_string());
        }
        if self.name.contains(['/', '\\']) {
            return invalid(format!("journal name {:?} must not contain separators", self.name));
        }
        if self.index_density == 0 {
            return invalid("index density must be greater than zero".to_string());
        }
        if self.max_segment_size < MIN_SEGMENT_SIZE {
            return invalid(format!(
                "max segment size {} is below the minimum of {MIN_SEGMENT_SIZE} bytes",
                self.max_segment_size
            ));
        }
        if usize::try_from(self.max_segment_size).is_err() {
            return invalid(format!(
                "max segment size {} cannot be mapped on this platform",
                self.max_segment_size
            ));
        }
        if let FlushStrategy::Delayed { delay_ms: 0, .. } = self.flush {
            return invalid("delayed flush requires a non-zero delay".to_string());
        }
        Ok(())
    }
}
