//! Concurrent recursive directory walker.
//!
//! Every directory is scanned by its own task. A task lists the directory,
//! records files inline and submits one new task per subdirectory to the
//! shared pool. Completion is a dynamic join: each task registers with
//! [`ScanRun::begin_task`] before it is submitted and retires with
//! [`ScanRun::end_task`] when done, and the single task that takes the count
//! to zero reports the end of the scan. The root listing holds one unit of
//! that count itself, registered by the session before the count pre-pass,
//! so a root without subdirectories finishes the scan on its own.
//!
//! A task moves through `Pending`, `Listing`, `Dispatching`, `Draining` and
//! `Done`. `Draining` closes the entry loop: when cancellation arrived
//! mid-listing the remaining entries are dropped there, and entries already
//! recorded stay in the tree.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use rayon::ThreadPool;
use tracing::trace;

use dirscope_core::{ScanWarning, TreeNode};

use crate::entry::{DirEntryInfo, EntryKind, list_directory};
use crate::progress::ScanEvent;
use crate::state::ScanRun;

/// Lifecycle of one directory task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Listing,
    Dispatching,
    Draining,
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the state of the task scanning one directory.
struct DirTask<'a> {
    path: &'a Path,
    state: TaskState,
}

impl<'a> DirTask<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            state: TaskState::Pending,
        }
    }

    fn advance(&mut self, next: TaskState) {
        trace!(path = %self.path.display(), from = %self.state, to = %next, "Directory task");
        self.state = next;
    }
}

/// Walks a tree rooted at one directory node.
pub(crate) struct Walker {
    run: Arc<ScanRun>,
    pool: Arc<ThreadPool>,
    root: Arc<TreeNode>,
    include_hidden: bool,
}

impl Walker {
    pub fn new(
        run: Arc<ScanRun>,
        pool: Arc<ThreadPool>,
        root: Arc<TreeNode>,
        include_hidden: bool,
    ) -> Self {
        Self {
            run,
            pool,
            root,
            include_hidden,
        }
    }

    /// Scan the root directory on the calling thread; subdirectories go to the pool.
    ///
    /// The caller must already hold the root's unit of outstanding work.
    pub fn start(self: Arc<Self>) {
        let root = Arc::clone(&self.root);
        self.run_task(&root);
    }

    fn spawn_task(self: &Arc<Self>, node: Arc<TreeNode>) {
        self.run.begin_task();
        let walker = Arc::clone(self);
        self.pool.spawn(move || walker.run_task(&node));
    }

    /// Scan one directory, then retire it. Always reaches the retire step,
    /// even if the scan panics, so the join can still reach zero.
    fn run_task(self: &Arc<Self>, node: &Arc<TreeNode>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scan_directory(node)));
        if let Err(payload) = outcome {
            let reason = panic_message(payload.as_ref());
            self.run
                .emit_warning(ScanWarning::task_panicked(node.path(), &reason));
        }

        node.seal();
        if self.run.end_task() {
            self.run.complete(Some(Arc::clone(&self.root)));
        }
    }

    fn scan_directory(self: &Arc<Self>, node: &Arc<TreeNode>) {
        let mut task = DirTask::new(node.path());

        task.advance(TaskState::Listing);
        if self.run.is_cancelled() {
            task.advance(TaskState::Done);
            return;
        }

        let listing = match list_directory(node.path(), self.include_hidden) {
            Ok(l) => l,
            Err(err) => {
                self.run.emit_warning(ScanWarning::from_scan_error(&err));
                task.advance(TaskState::Done);
                return;
            }
        };
        for warning in listing.skipped {
            self.run.emit_warning(warning);
        }

        task.advance(TaskState::Dispatching);
        let total = listing.entries.len();
        let mut processed = 0;
        for entry in listing.entries {
            if self.run.is_cancelled() {
                break;
            }
            match entry.kind {
                EntryKind::File => self.record_file(node, entry),
                EntryKind::Directory => self.dispatch_directory(node, entry),
                EntryKind::SymlinkDirectory => {
                    let leaf = TreeNode::new_directory(entry.name, entry.path, entry.modified);
                    leaf.seal();
                    node.add_child(Arc::new(leaf));
                }
            }
            processed += 1;
        }

        task.advance(TaskState::Draining);
        if processed < total {
            trace!(
                path = %node.path().display(),
                dropped = total - processed,
                "Cancelled mid-listing"
            );
        }
        task.advance(TaskState::Done);
    }

    fn record_file(&self, parent: &TreeNode, entry: DirEntryInfo) {
        let size = entry.size;
        let current_path = entry.path.display().to_string();
        parent.add_child(Arc::new(TreeNode::new_file(
            entry.name,
            entry.path.clone(),
            size,
            entry.modified,
        )));

        let (files, bytes) = self.run.record_file(size);
        self.run.emit(ScanEvent::FileFound {
            path: entry.path,
            size,
        });
        self.run
            .emit(ScanEvent::Progress(self.run.progress(current_path, files, bytes)));
    }

    fn dispatch_directory(self: &Arc<Self>, parent: &TreeNode, entry: DirEntryInfo) {
        let child = Arc::new(TreeNode::new_directory(entry.name, entry.path, entry.modified));
        parent.add_child(Arc::clone(&child));

        if self.run.is_cancelled() {
            child.seal();
            return;
        }
        self.spawn_task(child);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
