//! Directory listing and entry classification.
//!
//! The counter and the walker both go through [`list_directory`] so that they
//! agree on what is a file: a file counted by the pre-pass is exactly a file
//! the walker will record.

use std::cmp::Ordering;
use std::fs::{self, FileType, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use compact_str::CompactString;

use dirscope_core::{ScanError, ScanWarning};

/// How a directory entry takes part in the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Regular file, or a symlink to one.
    File,
    /// Real directory; scanned recursively.
    Directory,
    /// Symlink to a directory; recorded as a leaf, never descended into.
    SymlinkDirectory,
}

impl EntryKind {
    pub(crate) fn is_dir_like(self) -> bool {
        matches!(self, EntryKind::Directory | EntryKind::SymlinkDirectory)
    }
}

/// A classified directory entry.
#[derive(Debug, Clone)]
pub(crate) struct DirEntryInfo {
    pub name: CompactString,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
}

/// Entries of one directory, plus the entries that could not be read.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub entries: Vec<DirEntryInfo>,
    pub skipped: Vec<ScanWarning>,
}

/// List a directory, sorted with directories first and then by name.
///
/// Broken symlinks and special files are left out. Entries whose metadata
/// cannot be read end up in [`Listing::skipped`]; only a failure to open the
/// directory itself is an error.
pub(crate) fn list_directory(path: &Path, include_hidden: bool) -> Result<Listing, ScanError> {
    let read_dir = fs::read_dir(path).map_err(|e| ScanError::io(path, e))?;
    let mut listing = Listing::default();

    for entry_result in read_dir {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                listing.skipped.push(ScanWarning::read_error(path, &err));
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        let entry_path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(err) => {
                listing.skipped.push(ScanWarning::metadata_error(&entry_path, &err));
                continue;
            }
        };

        match classify(&entry_path, file_type) {
            Ok(Some((kind, metadata))) => listing.entries.push(DirEntryInfo {
                name: name.into(),
                size: if kind == EntryKind::File { metadata.len() } else { 0 },
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                path: entry_path,
                kind,
            }),
            Ok(None) => {}
            Err(err) => listing.skipped.push(ScanWarning::metadata_error(&entry_path, &err)),
        }
    }

    listing.entries.sort_by(compare_entries);
    Ok(listing)
}

/// Directories first, then by name.
fn compare_entries(a: &DirEntryInfo, b: &DirEntryInfo) -> Ordering {
    b.kind
        .is_dir_like()
        .cmp(&a.kind.is_dir_like())
        .then_with(|| a.name.cmp(&b.name))
}

/// Classify an entry, following symlinks one level to see what they point at.
///
/// Returns `None` for entries that are not part of the scan.
fn classify(path: &Path, file_type: FileType) -> io::Result<Option<(EntryKind, Metadata)>> {
    if file_type.is_symlink() {
        let target = match fs::metadata(path) {
            Ok(m) => m,
            // Dangling link.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        return Ok(if target.is_dir() {
            Some((EntryKind::SymlinkDirectory, target))
        } else if target.is_file() {
            Some((EntryKind::File, target))
        } else {
            None
        });
    }

    let metadata = fs::symlink_metadata(path)?;
    Ok(if file_type.is_dir() {
        Some((EntryKind::Directory, metadata))
    } else if file_type.is_file() {
        Some((EntryKind::File, metadata))
    } else {
        None
    })
}
