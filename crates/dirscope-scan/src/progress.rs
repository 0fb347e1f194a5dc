//! Scan progress reporting and the session event stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use dirscope_core::{ScanWarning, TreeNode};

/// `current_path` of the final progress event of a completed scan.
pub const DONE_MARKER: &str = "done";

/// `current_path` of the final progress event of a cancelled scan.
pub const CANCELLED_MARKER: &str = "cancelled";

/// Identifies one accepted `start()` of a session. Ids increase from 1.
pub type RunId = u64;

/// Receiving half of a session's event stream.
pub type ScanEvents = mpsc::UnboundedReceiver<ScanEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<ScanEvent>;

/// Events emitted by a [`ScanSession`](crate::ScanSession).
///
/// Progress, file and error events always belong to the current run. Each
/// accepted run ends with exactly one `Finished` carrying its id, including
/// a run that was stopped and replaced before its tasks drained.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Running totals, sent after each recorded file and once at the end.
    Progress(ScanProgress),
    /// A file was recorded in the tree.
    FileFound { path: PathBuf, size: u64 },
    /// The scan ended. A `None` root means it was cancelled.
    Finished {
        run: RunId,
        root: Option<Arc<TreeNode>>,
    },
    /// A recoverable per-directory failure, or the fatal rejection of the root.
    Error(ScanWarning),
}

/// Progress information during a scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// `files_scanned * 100 / total_files`. Not clamped: it can exceed 100
    /// when the count pre-pass saw fewer files than the walk finds.
    pub percent: u64,
    /// Path of the file just recorded, or a marker on the final event.
    pub current_path: String,
    /// Number of files recorded so far.
    pub files_scanned: u64,
    /// Total bytes of the files recorded so far.
    pub bytes_scanned: u64,
    /// Time elapsed since the scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Percentage clamped for display.
    pub fn display_percent(&self) -> u64 {
        self.percent.min(100)
    }

    /// Whether this is the last progress event of a scan.
    pub fn is_final(&self) -> bool {
        self.current_path == DONE_MARKER || self.current_path == CANCELLED_MARKER
    }

    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Raw progress percentage; 0 when nothing was counted.
pub fn percent(files_scanned: u64, total_files: u64) -> u64 {
    if total_files == 0 {
        0
    } else {
        files_scanned.saturating_mul(100) / total_files
    }
}
