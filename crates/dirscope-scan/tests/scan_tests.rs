use dirscope_scan::{
    CANCELLED_MARKER, DONE_MARKER, ScanConfig, ScanEvent, ScanEvents, ScanSession, TreeNode,
    WarningKind,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Collect events until `Finished`, failing the test if it never arrives.
fn collect_until_finished(rx: &mut ScanEvents) -> (Vec<ScanEvent>, Option<Arc<TreeNode>>) {
    let deadline = Instant::now() + SCAN_TIMEOUT;
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ScanEvent::Finished { root, .. }) => return (events, root),
            Ok(event) => events.push(event),
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Err(err) => panic!("scan did not finish within {SCAN_TIMEOUT:?}: {err:?}"),
        }
    }
}

fn scan(path: &Path) -> (Vec<ScanEvent>, Option<Arc<TreeNode>>) {
    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();
    session.start(path).unwrap();
    collect_until_finished(&mut rx)
}

fn final_progress(events: &[ScanEvent]) -> &dirscope_scan::ScanProgress {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            ScanEvent::Progress(p) => Some(p),
            _ => None,
        })
        .expect("no progress events")
}

fn errors(events: &[ScanEvent]) -> Vec<&dirscope_scan::ScanWarning> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Error(w) => Some(w),
            _ => None,
        })
        .collect()
}

fn assert_total_invariant(node: &TreeNode) {
    let children = node.children();
    let expected: u64 = node.size() + children.iter().map(|c| c.total_size()).sum::<u64>();
    assert_eq!(node.total_size(), expected);
    if node.is_file() {
        assert!(children.is_empty());
    } else {
        assert_eq!(node.size(), 0);
    }
    for child in &children {
        assert_total_invariant(child);
    }
}

/// (name, size, is_dir, children) with order preserved.
#[derive(Debug, PartialEq)]
struct Shape(String, u64, bool, Vec<Shape>);

fn shape(node: &TreeNode) -> Shape {
    Shape(
        node.name().to_string(),
        node.size(),
        node.is_dir(),
        node.children().iter().map(|c| shape(c)).collect(),
    )
}

fn create_wide_tree(dirs: usize, files_per_dir: usize) -> TempDir {
    let temp = TempDir::new().unwrap();
    for d in 0..dirs {
        let dir = temp.path().join(format!("dir{d:03}")).join("nested");
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            fs::write(dir.join(format!("f{f}.dat")), vec![b'x'; f + 1]).unwrap();
        }
        fs::write(dir.parent().unwrap().join("top.dat"), "1234").unwrap();
    }
    temp
}

#[test]
fn test_example_tree() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), vec![0u8; 100]).unwrap();
    fs::create_dir(temp.path().join("sub")).unwrap();
    fs::write(temp.path().join("sub/b.txt"), vec![0u8; 50]).unwrap();

    let (events, root) = scan(temp.path());
    let root = root.expect("scan should complete");

    assert_eq!(root.size(), 0);
    assert_eq!(root.total_size(), 150);

    let children = root.children();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name(), "sub");
    assert!(children[0].is_dir());
    assert_eq!(children[0].size(), 0);
    assert_eq!(children[1].name(), "a.txt");
    assert_eq!(children[1].size(), 100);

    let sub_children = children[0].children();
    assert_eq!(sub_children.len(), 1);
    assert_eq!(sub_children[0].name(), "b.txt");
    assert_eq!(sub_children[0].size(), 50);

    let found = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::FileFound { .. }))
        .count();
    assert_eq!(found, 2);

    let last = final_progress(&events);
    assert_eq!(last.percent, 100);
    assert_eq!(last.current_path, DONE_MARKER);
    assert_eq!(last.files_scanned, 2);
    assert_eq!(last.bytes_scanned, 150);
    assert!(errors(&events).is_empty());
}

#[test]
fn test_initial_progress_is_zero() {
    let temp = create_wide_tree(2, 2);
    let (events, _) = scan(temp.path());

    match &events[0] {
        ScanEvent::Progress(p) => {
            assert_eq!(p.percent, 0);
            assert_eq!(p.files_scanned, 0);
            assert_eq!(p.bytes_scanned, 0);
        }
        other => panic!("first event should be progress, got {other:?}"),
    }
}

#[test]
fn test_totals_match_tree() {
    let temp = create_wide_tree(20, 10);
    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();
    session.start(temp.path()).unwrap();
    let (events, root) = collect_until_finished(&mut rx);
    let root = root.unwrap();

    assert!(root.is_subtree_sealed());
    assert_total_invariant(&root);

    let stats = session.stats();
    assert_eq!(stats.active_tasks, 0);
    assert_eq!(stats.scanned_files, root.file_count());
    assert_eq!(stats.scanned_files, 20 * 11);
    assert_eq!(stats.total_files, stats.scanned_files);
    assert_eq!(stats.bytes_scanned, root.total_size());
    assert!(!session.is_running());

    // The count is exact on a static tree, so per-file percentages stay in range.
    for event in &events {
        if let ScanEvent::Progress(p) = event {
            assert!(p.percent <= 100);
        }
    }
}

#[test]
fn test_rescan_is_structurally_identical() {
    let temp = create_wide_tree(8, 5);
    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();

    session.start(temp.path()).unwrap();
    let (_, first) = collect_until_finished(&mut rx);
    session.start(temp.path()).unwrap();
    let (_, second) = collect_until_finished(&mut rx);

    assert_eq!(shape(&first.unwrap()), shape(&second.unwrap()));
}

#[test]
fn test_parallel_count() {
    let temp = create_wide_tree(10, 3);
    let config = ScanConfig::builder()
        .parallel_count(true)
        .threads(3usize)
        .build()
        .unwrap();
    let (session, mut rx) = ScanSession::new(config).unwrap();

    session.start(temp.path()).unwrap();
    let (_, root) = collect_until_finished(&mut rx);

    assert_eq!(session.stats().total_files, 40);
    assert_eq!(root.unwrap().file_count(), 40);
}

#[test]
fn test_invalid_path_emits_single_error() {
    let temp = TempDir::new().unwrap();
    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();

    assert!(session.start(temp.path().join("missing")).is_err());
    assert!(!session.is_running());

    match rx.try_recv() {
        Ok(ScanEvent::Error(warning)) => {
            assert_eq!(warning.kind, WarningKind::InvalidPath);
            assert!(warning.is_fatal());
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_file_root_is_invalid() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("plain.txt");
    fs::write(&file, "x").unwrap();

    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();
    assert!(session.start(&file).is_err());
    assert!(matches!(rx.try_recv(), Ok(ScanEvent::Error(_))));
}

#[test]
fn test_stop_when_idle_is_noop() {
    let (session, _rx) = ScanSession::new(ScanConfig::new()).unwrap();
    session.stop();
    assert!(!session.is_running());
}

/// Drain `Finished` events until `expected` have arrived, then check that no
/// more follow. Returns the run ids in arrival order.
fn collect_finished(rx: &mut ScanEvents, expected: usize) -> Vec<(u64, bool)> {
    let deadline = Instant::now() + SCAN_TIMEOUT;
    let mut finished = Vec::new();
    while finished.len() < expected {
        match rx.try_recv() {
            Ok(ScanEvent::Finished { run, root }) => finished.push((run, root.is_some())),
            Ok(_) => {}
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(2)),
            Err(err) => panic!(
                "only {} of {expected} runs finished within {SCAN_TIMEOUT:?}: {err:?}",
                finished.len()
            ),
        }
    }
    thread::sleep(Duration::from_millis(50));
    let extra = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, ScanEvent::Finished { .. }))
        .count();
    assert_eq!(extra, 0, "unexpected extra Finished events");
    finished
}

#[test]
fn test_stop_mid_scan_reports_cancellation() {
    let temp = create_wide_tree(200, 20);
    let config = ScanConfig::builder()
        .stop_grace_period(Duration::from_secs(5))
        .build()
        .unwrap();
    let (session, mut rx) = ScanSession::new(config).unwrap();

    assert!(session.start(temp.path()).unwrap().is_some());
    // Stop as soon as the walk has recorded its first file.
    loop {
        match rx.blocking_recv() {
            Some(ScanEvent::FileFound { .. }) => break,
            Some(ScanEvent::Finished { .. }) | None => {
                panic!("scan ended before it could be stopped")
            }
            Some(_) => {}
        }
    }
    let stop_started = Instant::now();
    session.stop();
    assert!(stop_started.elapsed() < Duration::from_secs(6));
    assert!(!session.is_running());

    let (events, root) = collect_until_finished(&mut rx);
    assert!(root.is_none());
    let last = final_progress(&events);
    assert_eq!(last.percent, 100);
    assert_eq!(last.current_path, CANCELLED_MARKER);
    assert!(last.files_scanned < 200 * 21);

    let stats = session.stats();
    assert!(stats.cancelled);
    assert_eq!(stats.active_tasks, 0);
    assert!(collect_finished(&mut rx, 0).is_empty());
}

#[test]
fn test_every_start_finishes_once_across_restarts() {
    let temp = create_wide_tree(20, 5);
    let config = ScanConfig::builder()
        .stop_grace_period(Duration::from_millis(1))
        .poll_interval(Duration::from_millis(1))
        .build()
        .unwrap();
    let (session, mut rx) = ScanSession::new(config).unwrap();

    let mut accepted = Vec::new();
    for _ in 0..200 {
        if let Some(run) = session.start(temp.path()).unwrap() {
            accepted.push(run);
        }
        session.stop();
    }
    assert_eq!(accepted.len(), 200);

    let mut finished: Vec<u64> = collect_finished(&mut rx, accepted.len())
        .into_iter()
        .map(|(run, _)| run)
        .collect();
    finished.sort_unstable();
    assert_eq!(finished, accepted);
}

#[test]
fn test_restart_after_forced_stop() {
    let big = create_wide_tree(200, 20);
    let small = create_wide_tree(3, 2);
    let config = ScanConfig::builder()
        .stop_grace_period(Duration::from_millis(1))
        .poll_interval(Duration::from_millis(1))
        .build()
        .unwrap();
    let (session, mut rx) = ScanSession::new(config).unwrap();

    let first = session.start(big.path()).unwrap().unwrap();
    session.stop();
    assert!(!session.is_running());
    let second = session.start(small.path()).unwrap().unwrap();
    assert!(second > first);

    let finished = collect_finished(&mut rx, 2);
    let outcome = |run| finished.iter().find(|(id, _)| *id == run).map(|(_, ok)| *ok);
    assert_eq!(outcome(first), Some(false));
    assert_eq!(outcome(second), Some(true));
    assert_eq!(session.stats().scanned_files, 9);
}

#[tokio::test]
async fn test_async_consumer() {
    let temp = create_wide_tree(3, 3);
    let (session, mut rx) = ScanSession::new(ScanConfig::new()).unwrap();
    session.start(temp.path()).unwrap();

    let root = tokio::time::timeout(SCAN_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if let ScanEvent::Finished { root, .. } = event {
                return root;
            }
        }
        None
    })
    .await
    .expect("scan timed out");

    assert_eq!(root.unwrap().file_count(), 12);
}

#[cfg(unix)]
#[test]
fn test_symlinked_directory_is_leaf() {
    use std::os::unix::fs::symlink;

    let temp = TempDir::new().unwrap();
    let realdir = temp.path().join("realdir");
    fs::create_dir(&realdir).unwrap();
    fs::write(realdir.join("inside.txt"), vec![0u8; 30]).unwrap();
    symlink(&realdir, temp.path().join("link")).unwrap();

    let (_, root) = scan(temp.path());
    let root = root.unwrap();

    let link = root.find("link").unwrap();
    assert!(link.is_dir());
    assert_eq!(link.child_count(), 0);
    assert_eq!(link.total_size(), 0);

    let real = root.find("realdir").unwrap();
    assert_eq!(real.child_count(), 1);
    assert_eq!(root.total_size(), 30);
    assert_eq!(root.file_count(), 1);
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_reported() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), vec![0u8; 10]).unwrap();
    let locked = temp.path().join("sub2");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("hidden.txt"), "secret").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Root can list anything; nothing to test then.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let (events, root) = scan(temp.path());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let root = root.expect("scan should still complete");
    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, WarningKind::PermissionDenied);
    assert!(errors[0].path.ends_with("sub2"));

    let sub2 = root.find("sub2").unwrap();
    assert!(sub2.is_dir());
    assert_eq!(sub2.child_count(), 0);
    assert_eq!(root.find("a.txt").unwrap().size(), 10);
    assert_eq!(root.total_size(), 10);
}

#[cfg(unix)]
#[test]
fn test_many_unreadable_directories_still_finish() {
    use std::os::unix::fs::PermissionsExt;

    let temp = create_wide_tree(30, 2);
    let locked: Vec<_> = (0..30)
        .step_by(3)
        .map(|d| temp.path().join(format!("dir{d:03}")).join("nested"))
        .collect();
    for dir in &locked {
        fs::set_permissions(dir, fs::Permissions::from_mode(0o000)).unwrap();
    }
    let privileged = fs::read_dir(&locked[0]).is_ok();

    let (events, root) = scan(temp.path());
    for dir in &locked {
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let root = root.expect("scan should complete");
    assert_total_invariant(&root);
    let expected_errors = if privileged { 0 } else { locked.len() };
    assert_eq!(errors(&events).len(), expected_errors);
}
