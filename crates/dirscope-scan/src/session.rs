//! Scan session: count pre-pass, walk, cancellation and events.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Instant, UNIX_EPOCH};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dirscope_core::{ScanConfig, ScanError, ScanWarning, TreeNode};

use crate::counter::FileCounter;
use crate::progress::{EventSender, RunId, ScanEvent, ScanEvents};
use crate::state::{ScanRun, ScanStats, SessionShared};
use crate::walker::Walker;

/// Owns the worker pool and drives scans of a directory tree.
///
/// Each [`start`](ScanSession::start) runs a file-count pre-pass and then a
/// concurrent walk on a background coordinator thread, reporting through the
/// [`ScanEvents`] stream returned by [`ScanSession::new`]. Every accepted
/// `start` ends in exactly one [`ScanEvent::Finished`] carrying the id that
/// `start` returned.
pub struct ScanSession {
    config: ScanConfig,
    pool: Arc<ThreadPool>,
    events: EventSender,
    shared: Arc<SessionShared>,
    current: Mutex<Option<Arc<ScanRun>>>,
}

impl ScanSession {
    /// Create a session and the receiving end of its event stream.
    pub fn new(config: ScanConfig) -> Result<(Self, ScanEvents), ScanError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.pool_size())
            .thread_name(|i| format!("dirscope-worker-{i}"))
            .build()
            .map_err(|e| ScanError::ThreadPool {
                message: e.to_string(),
            })?;
        debug!(threads = pool.current_num_threads(), "Scan session created");

        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            pool: Arc::new(pool),
            events,
            shared: Arc::new(SessionShared::default()),
            current: Mutex::new(None),
        };
        Ok((session, rx))
    }

    /// Session configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Whether a scan is in progress.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Counters of the current or most recent run.
    pub fn stats(&self) -> ScanStats {
        self.current_run().map(|run| run.stats()).unwrap_or_default()
    }

    /// Start scanning `path` in the background.
    ///
    /// Returns the id of the new run, or `None` if a scan is already running
    /// and the call was ignored. If `path` is missing or is not a directory,
    /// one fatal [`ScanEvent::Error`] is emitted, no `Finished` follows, and
    /// the error is returned.
    pub fn start(&self, path: impl AsRef<Path>) -> Result<Option<RunId>, ScanError> {
        let path = path.as_ref();
        let mut state = self.shared.write();
        if state.running {
            debug!(path = %path.display(), "Scan already running, ignoring start");
            return Ok(None);
        }

        let root_path = match resolve_root(path) {
            Ok(p) => p,
            Err(err) => {
                let _ = self
                    .events
                    .send(ScanEvent::Error(ScanWarning::invalid_path(path, &err)));
                return Err(err);
            }
        };

        let id = state.current + 1;
        let run = Arc::new(ScanRun::new(id, self.events.clone(), Arc::clone(&self.shared)));
        // The root listing's unit of work, held through the count pre-pass
        // and handed to the walker.
        run.begin_task();

        let coordinator = Coordinator {
            run: Arc::clone(&run),
            pool: Arc::clone(&self.pool),
            root_path,
            parallel_count: self.config.parallel_count,
            include_hidden: self.config.include_hidden,
        };
        thread::Builder::new()
            .name("dirscope-scan".to_string())
            .spawn(move || coordinator.run())
            .map_err(|e| ScanError::ThreadPool {
                message: e.to_string(),
            })?;

        state.current = id;
        state.running = true;
        *self.lock_current() = Some(run);
        debug!(path = %path.display(), run = id, "Starting scan");
        Ok(Some(id))
    }

    /// Request cancellation and wait, bounded by the grace period, for
    /// in-flight tasks to drain.
    ///
    /// Tasks still queued after the grace period exit as soon as they run,
    /// without listing their directory. The session is not running once this
    /// returns; the run's `Finished` with a `None` root arrives when its last
    /// task retires.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        let Some(run) = self.current_run() else {
            return;
        };

        debug!(run = run.id(), "Scan stop requested");
        run.cancel();

        let deadline = Instant::now() + self.config.stop_grace_period;
        while run.active_tasks() > 0 && Instant::now() < deadline {
            thread::sleep(self.config.poll_interval);
        }

        let remaining = run.active_tasks();
        if remaining > 0 {
            warn!(
                active_tasks = remaining,
                "Grace period elapsed; remaining tasks will exit without scanning"
            );
        }

        self.shared.stop_run(run.id());
        debug!(run = run.id(), active_tasks = remaining, "Scan stopped");
    }

    fn current_run(&self) -> Option<Arc<ScanRun>> {
        self.lock_current().clone()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<ScanRun>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs the count pre-pass and the root walk of one run.
struct Coordinator {
    run: Arc<ScanRun>,
    pool: Arc<ThreadPool>,
    root_path: PathBuf,
    parallel_count: bool,
    include_hidden: bool,
}

impl Coordinator {
    fn run(self) {
        let counter =
            FileCounter::new(self.run.cancel_token().clone()).include_hidden(self.include_hidden);
        let count = if self.parallel_count {
            counter.count_on(&self.pool, &self.root_path)
        } else {
            counter.count(&self.root_path)
        };
        debug!(
            total_files = count.files,
            unreadable = count.errors.len(),
            cancelled = count.cancelled,
            "File count complete"
        );
        self.run.set_total_files(count.files);

        let root_display = self.root_path.display().to_string();
        self.run
            .emit(ScanEvent::Progress(self.run.progress(root_display, 0, 0)));

        if self.run.is_cancelled() {
            if self.run.end_task() {
                self.run.complete(None);
            }
            return;
        }

        let root = Arc::new(root_node(&self.root_path));
        Arc::new(Walker::new(self.run, self.pool, root, self.include_hidden)).start();
    }
}

/// Canonicalize the scan root and check that it is a directory.
fn resolve_root(path: &Path) -> Result<PathBuf, ScanError> {
    let root = path.canonicalize().map_err(|e| ScanError::io(path, e))?;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory { path: root });
    }
    Ok(root)
}

fn root_node(root_path: &Path) -> TreeNode {
    let name = root_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root_path.to_string_lossy().to_string());
    let modified = std::fs::metadata(root_path)
        .and_then(|m| m.modified())
        .unwrap_or(UNIX_EPOCH);
    TreeNode::new_directory(name, root_path, modified)
}
