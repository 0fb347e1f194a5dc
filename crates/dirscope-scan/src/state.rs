//! Shared state of one scan run.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use dirscope_core::{ScanWarning, TreeNode};

use crate::progress::{
    CANCELLED_MARKER, DONE_MARKER, EventSender, RunId, ScanEvent, ScanProgress, percent,
};

/// Session-wide run bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SessionState {
    pub running: bool,
    /// Id of the most recently accepted run; bumped by every `start()`.
    pub current: RunId,
}

/// State that outlives individual runs of a session.
///
/// Every check of the current run id that is followed by a send or by a
/// write of `running` happens under this lock, so a run that a concurrent
/// `start()` replaces can neither leak events into the new run nor clear
/// its running flag.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    state: RwLock<SessionState>,
}

impl SessionShared {
    pub fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.read().running
    }

    /// Mark the session idle, unless `run` has been replaced already.
    pub fn stop_run(&self, run: RunId) {
        let mut state = self.write();
        if state.current == run {
            state.running = false;
        }
    }
}

/// Counters, cancellation and event delivery for one `start()`.
///
/// Every task of the run holds an `Arc` to this; nothing here is global.
#[derive(Debug)]
pub(crate) struct ScanRun {
    id: RunId,
    cancel: CancellationToken,
    total_files: AtomicU64,
    scanned_files: AtomicU64,
    bytes_scanned: AtomicU64,
    active_tasks: AtomicUsize,
    completed: AtomicBool,
    started: Instant,
    events: EventSender,
    shared: Arc<SessionShared>,
}

/// Point-in-time copy of a run's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStats {
    /// Files found by the count pre-pass.
    pub total_files: u64,
    /// Files recorded by the walk so far.
    pub scanned_files: u64,
    /// Bytes recorded by the walk so far.
    pub bytes_scanned: u64,
    /// Outstanding units of work: the root listing, held from `start()`
    /// through the count pre-pass, plus dispatched directory tasks not yet done.
    pub active_tasks: usize,
    /// Whether cancellation has been requested.
    pub cancelled: bool,
}

impl ScanRun {
    pub fn new(id: RunId, events: EventSender, shared: Arc<SessionShared>) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            total_files: AtomicU64::new(0),
            scanned_files: AtomicU64::new(0),
            bytes_scanned: AtomicU64::new(0),
            active_tasks: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            started: Instant::now(),
            events,
            shared,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::Release);
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Register one unit of outstanding work.
    pub fn begin_task(&self) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// Retire one unit of outstanding work.
    ///
    /// Returns `true` for exactly one caller: the one whose decrement took
    /// the count to zero. That caller must call [`ScanRun::complete`].
    pub fn end_task(&self) -> bool {
        let previous = self.active_tasks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "active task count underflow");
        previous == 1
    }

    /// Count a recorded file; returns the post-increment totals.
    pub fn record_file(&self, size: u64) -> (u64, u64) {
        let files = self.scanned_files.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = self.bytes_scanned.fetch_add(size, Ordering::AcqRel) + size;
        (files, bytes)
    }

    pub fn progress(&self, current_path: impl Into<String>, files: u64, bytes: u64) -> ScanProgress {
        ScanProgress {
            percent: percent(files, self.total_files.load(Ordering::Acquire)),
            current_path: current_path.into(),
            files_scanned: files,
            bytes_scanned: bytes,
            elapsed: self.started.elapsed(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            total_files: self.total_files.load(Ordering::Acquire),
            scanned_files: self.scanned_files.load(Ordering::Acquire),
            bytes_scanned: self.bytes_scanned.load(Ordering::Acquire),
            active_tasks: self.active_tasks(),
            cancelled: self.is_cancelled(),
        }
    }

    /// Send an event, unless a newer run has replaced this one.
    pub fn emit(&self, event: ScanEvent) {
        let state = self.shared.read();
        if state.current != self.id {
            return;
        }
        // A dropped receiver just means nobody is listening.
        let _ = self.events.send(event);
    }

    pub fn emit_warning(&self, warning: ScanWarning) {
        debug!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
        self.emit(ScanEvent::Error(warning));
    }

    /// Emit the final progress event and `Finished`, once per run.
    ///
    /// A cancelled run reports a `None` root regardless of `root`. A run that
    /// a newer `start()` has replaced still sends its `Finished`, tagged with
    /// its own id, but no final progress and leaves `running` alone.
    pub fn complete(&self, root: Option<Arc<TreeNode>>) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        let stats = self.stats();
        let (marker, root) = if stats.cancelled {
            (CANCELLED_MARKER, None)
        } else {
            (DONE_MARKER, root)
        };

        debug!(
            run = self.id,
            files = stats.scanned_files,
            bytes = stats.bytes_scanned,
            cancelled = stats.cancelled,
            elapsed = ?self.started.elapsed(),
            "Scan finished"
        );

        let mut state = self.shared.write();
        if state.current == self.id {
            let mut progress = self.progress(marker, stats.scanned_files, stats.bytes_scanned);
            progress.percent = 100;
            let _ = self.events.send(ScanEvent::Progress(progress));
            // Cleared before `Finished` is sent so a consumer reacting to it
            // can start again right away.
            state.running = false;
        }
        let _ = self.events.send(ScanEvent::Finished { run: self.id, root });
    }
}
