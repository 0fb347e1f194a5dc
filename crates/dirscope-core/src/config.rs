//! Scan configuration types.

use std::num::NonZeroUsize;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Smallest worker pool a session will run with.
pub const MIN_POOL_SIZE: usize = 2;

/// How long `stop()` waits for in-flight tasks to drain.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How often `stop()` re-checks the outstanding task count.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a scan session.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Number of worker threads (0 = auto-detect, never fewer than 2).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Upper bound on how long `stop()` blocks waiting for tasks to drain.
    #[builder(default = "DEFAULT_STOP_GRACE_PERIOD")]
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period: Duration,

    /// Poll step of `stop()`'s drain loop.
    #[builder(default = "DEFAULT_POLL_INTERVAL")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Run the file-count pre-pass on the worker pool.
    #[builder(default = "false")]
    #[serde(default)]
    pub parallel_count: bool,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,
}

fn default_true() -> bool {
    true
}

fn default_stop_grace_period() -> Duration {
    DEFAULT_STOP_GRACE_PERIOD
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let grace = self.stop_grace_period.unwrap_or(DEFAULT_STOP_GRACE_PERIOD);
        let poll = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);

        if poll.is_zero() {
            return Err("Poll interval must be greater than zero".to_string());
        }
        if poll > grace {
            return Err(format!(
                "Poll interval ({poll:?}) cannot exceed the stop grace period ({grace:?})"
            ));
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a config with default settings.
    pub fn new() -> Self {
        Self {
            threads: 0,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            parallel_count: false,
            include_hidden: true,
        }
    }

    /// Effective worker pool size.
    pub fn pool_size(&self) -> usize {
        let requested = match self.threads {
            0 => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(MIN_POOL_SIZE),
            n => n,
        };
        requested.max(MIN_POOL_SIZE)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}
