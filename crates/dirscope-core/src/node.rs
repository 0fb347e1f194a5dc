//! Tree node type built by the walker and handed to consumers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// A single file or directory in the scanned tree.
///
/// Nodes are shared as `Arc<TreeNode>`. A directory's child list is appended
/// to only by the task that scans that directory, under a lock scoped to the
/// node itself, so tasks writing different directories never contend.
///
/// Once that task finishes the node is *sealed*: no further children will be
/// added. [`TreeNode::total_size`] may be called at any time, but while some
/// directory below the node is still unsealed the value only reflects the
/// children appended so far and is not cached.
#[derive(Debug)]
pub struct TreeNode {
    name: CompactString,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
    is_dir: bool,
    children: Mutex<Vec<Arc<TreeNode>>>,
    cached_total: Mutex<Option<u64>>,
    sealed: AtomicBool,
}

impl TreeNode {
    /// Create a new node with no children.
    ///
    /// A directory's own size is always 0; any `size` passed for a directory
    /// is ignored. Files are sealed on creation since they never have children.
    pub fn new(
        name: impl Into<CompactString>,
        path: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
        is_dir: bool,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: if is_dir { 0 } else { size },
            modified,
            is_dir,
            children: Mutex::new(Vec::new()),
            cached_total: Mutex::new(None),
            sealed: AtomicBool::new(!is_dir),
        }
    }

    /// Create a file node.
    pub fn new_file(
        name: impl Into<CompactString>,
        path: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        Self::new(name, path, size, modified, false)
    }

    /// Create an empty, unsealed directory node.
    pub fn new_directory(
        name: impl Into<CompactString>,
        path: impl Into<PathBuf>,
        modified: SystemTime,
    ) -> Self {
        Self::new(name, path, 0, modified, true)
    }

    /// Entry name (not the full path).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the entry.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Own size in bytes. Always 0 for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last modification time.
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    /// Append a child and invalidate this node's cached total.
    ///
    /// Only ancestors that have not cached a total yet will see the new child;
    /// ancestors only cache once their whole subtree is sealed, which cannot
    /// happen while this node still accepts children.
    pub fn add_child(&self, child: Arc<TreeNode>) {
        debug_assert!(self.is_dir, "file node {} cannot have children", self.path.display());
        debug_assert!(!self.is_sealed(), "append to sealed node {}", self.path.display());
        if !self.is_dir {
            return;
        }

        self.lock_children().push(child);
        *self.lock_cache() = None;
    }

    /// Snapshot of the current child list, in insertion order.
    pub fn children(&self) -> Vec<Arc<TreeNode>> {
        self.lock_children().clone()
    }

    /// Number of direct children appended so far.
    pub fn child_count(&self) -> usize {
        self.lock_children().len()
    }

    /// Mark the child list as closed.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether this node's own child list is closed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Whether this node and every node below it are sealed.
    pub fn is_subtree_sealed(&self) -> bool {
        self.is_sealed() && self.descendants().all(|node| node.is_sealed())
    }

    /// Own size plus the total size of every child, recursively.
    pub fn total_size(&self) -> u64 {
        self.aggregate().0
    }

    /// Returns the total and whether it is final (whole subtree sealed).
    ///
    /// Post-order over an explicit stack, so depth is bounded by memory
    /// rather than by the thread's stack.
    fn aggregate(&self) -> (u64, bool) {
        let mut stack = match Frame::open(self, None) {
            Ok(total) => return (total, true),
            Err(frame) => vec![frame],
        };

        loop {
            let Some(frame) = stack.last_mut() else {
                return (0, false);
            };
            if let Some(child) = frame.children.next() {
                match Frame::open(&child, Some(Arc::clone(&child))) {
                    Ok(total) => frame.total += total,
                    Err(child_frame) => stack.push(child_frame),
                }
                continue;
            }

            let Some(done) = stack.pop() else {
                return (0, false);
            };
            let node = done.node.as_deref().unwrap_or(self);
            if done.complete {
                *node.lock_cache() = Some(done.total);
            }
            match stack.last_mut() {
                Some(parent) => {
                    parent.total += done.total;
                    parent.complete &= done.complete;
                }
                None => return (done.total, done.complete),
            }
        }
    }

    /// Number of file nodes in this subtree (1 for a file).
    pub fn file_count(&self) -> u64 {
        if !self.is_dir {
            return 1;
        }
        self.descendants().filter(|node| node.is_file()).count() as u64
    }

    /// Number of directory nodes below this one.
    pub fn dir_count(&self) -> u64 {
        self.descendants().filter(|node| node.is_dir()).count() as u64
    }

    /// Every node below this one, depth first, children in insertion order.
    pub fn descendants(&self) -> Descendants {
        let mut stack = self.children();
        stack.reverse();
        Descendants { stack }
    }

    /// The `n` largest files in this subtree, largest first.
    ///
    /// Ties keep depth-first order.
    pub fn largest_files(&self, n: usize) -> Vec<Arc<TreeNode>> {
        let mut largest: Vec<Arc<TreeNode>> = Vec::with_capacity(n + 1);
        if n == 0 {
            return largest;
        }
        for node in self.descendants().filter(|node| node.is_file()) {
            if largest.len() == n && largest.last().is_some_and(|min| min.size >= node.size) {
                continue;
            }
            let at = largest.partition_point(|kept| kept.size >= node.size);
            largest.insert(at, node);
            largest.truncate(n);
        }
        largest
    }

    /// Look up a descendant by a path relative to this node.
    ///
    /// An empty path returns `None`; use the node itself instead.
    pub fn find(&self, relative: impl AsRef<Path>) -> Option<Arc<TreeNode>> {
        let mut components = relative.as_ref().components();
        let first = components.next()?;
        let mut current = self
            .children()
            .into_iter()
            .find(|c| c.name.as_str() == first.as_os_str())?;

        for component in components {
            let next = current
                .children()
                .into_iter()
                .find(|c| c.name.as_str() == component.as_os_str())?;
            current = next;
        }
        Some(current)
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<Arc<TreeNode>>> {
        // Appends never panic mid-update, so a poisoned list is still consistent.
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<u64>> {
        self.cached_total.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        // Unlink the subtree iteratively so a deep chain of uniquely owned
        // nodes does not recurse once per level.
        let children = self.children.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut stack = std::mem::take(children);
        while let Some(child) = stack.pop() {
            if let Some(mut node) = Arc::into_inner(child) {
                let grandchildren = node.children.get_mut().unwrap_or_else(PoisonError::into_inner);
                stack.append(grandchildren);
            }
        }
    }
}

/// Depth-first iterator over the nodes below a [`TreeNode`].
#[derive(Debug)]
pub struct Descendants {
    stack: Vec<Arc<TreeNode>>,
}

impl Iterator for Descendants {
    type Item = Arc<TreeNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let mark = self.stack.len();
        self.stack.extend(node.children());
        self.stack[mark..].reverse();
        Some(node)
    }
}

/// One level of [`TreeNode::aggregate`]'s walk.
struct Frame {
    /// `None` for the node the walk started from.
    node: Option<Arc<TreeNode>>,
    children: std::vec::IntoIter<Arc<TreeNode>>,
    total: u64,
    complete: bool,
}

impl Frame {
    /// `Ok` with the cached total, or a frame that still has to sum its children.
    fn open(node: &TreeNode, owner: Option<Arc<TreeNode>>) -> Result<u64, Frame> {
        if let Some(total) = *node.lock_cache() {
            return Ok(total);
        }
        // Seal state must be read before the snapshot: a node observed sealed
        // here cannot gain children the snapshot misses.
        let complete = node.is_sealed();
        let children = node.children();
        Err(Frame {
            node: owner,
            children: children.into_iter(),
            total: node.size,
            complete,
        })
    }
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let children = self.children();
        let children: Vec<&TreeNode> = children.iter().map(Arc::as_ref).collect();

        let mut state = serializer.serialize_struct("TreeNode", 7)?;
        state.serialize_field("name", self.name.as_str())?;
        state.serialize_field("path", &self.path)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("total_size", &self.total_size())?;
        state.serialize_field("modified", &DateTime::<Utc>::from(self.modified))?;
        state.serialize_field("is_dir", &self.is_dir)?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}
