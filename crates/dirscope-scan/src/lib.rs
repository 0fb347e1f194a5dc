//! Concurrent directory scanning engine for dirscope.
//!
//! # Overview
//!
//! A [`ScanSession`] walks a directory subtree and builds a [`TreeNode`] tree
//! mirroring it, reporting progress while the walk is in flight:
//!
//! - **Count pre-pass** via [`FileCounter`], giving a stable denominator
//!   for progress percentages
//! - **Parallel walk** with one task per directory on a rayon pool
//! - **Event stream** of progress, per-file, error and completion events
//! - **Cooperative cancellation** that lets in-flight tasks drain
//!
//! # Example
//!
//! ```rust,no_run
//! use dirscope_scan::{ScanConfig, ScanEvent, ScanSession};
//!
//! let (session, mut events) = ScanSession::new(ScanConfig::new()).unwrap();
//! session.start("/path/to/scan").unwrap();
//!
//! while let Some(event) = events.blocking_recv() {
//!     match event {
//!         ScanEvent::Progress(p) => eprintln!("{}% {}", p.display_percent(), p.current_path),
//!         ScanEvent::Error(warning) => eprintln!("warning: {warning}"),
//!         ScanEvent::Finished { root: Some(root), .. } => {
//!             println!("Total size: {} bytes", root.total_size());
//!             break;
//!         }
//!         ScanEvent::Finished { root: None, .. } => break,
//!         ScanEvent::FileFound { .. } => {}
//!     }
//! }
//! ```

mod counter;
mod entry;
mod progress;
mod session;
mod state;
mod walker;

pub use counter::{FileCount, FileCounter};
pub use progress::{
    CANCELLED_MARKER, DONE_MARKER, RunId, ScanEvent, ScanEvents, ScanProgress, percent,
};
pub use session::ScanSession;
pub use state::ScanStats;

// Re-export core types for convenience
pub use dirscope_core::{ScanConfig, ScanError, ScanWarning, TreeNode, WarningKind};
