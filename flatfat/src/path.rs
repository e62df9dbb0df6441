//! Slash-separated path lookup.

use std::io::{Read, Seek, Write};

use crate::volume::DirEntry;
use crate::{ClusterId, Error, FileSystem, Result};

/// What a path is expected to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
    Both,
}

/// A path turned into its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub entry: DirEntry,
    /// Directory holding the record
    pub parent: ClusterId,
    /// Slot of the record in `parent`, `None` for the root itself
    pub position: Option<usize>,
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits off the last component: `"/a/b/c"` gives `("/a/b", "c")`, `"c"` gives `("", "c")`.
///
/// Trailing slashes are ignored. An empty parent means the starting directory.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("", trimmed),
    }
}

/// Looks `path` up, starting at root when absolute and at `cwd` otherwise.
///
/// `.` and `..` are ordinary records, so they need no special handling.
pub fn resolve<D: Read + Write + Seek>(
    fs: &mut FileSystem<D>,
    cwd: ClusterId,
    path: &str,
    kind: PathKind,
) -> Result<Resolved> {
    let start = if is_absolute(path) { ClusterId::ROOT } else { cwd };
    let mut resolved = Resolved {
        entry: fs.dir_entry(start, false)?,
        parent: start,
        position: None,
    };

    for cmp in path.split('/').filter(|cmp| !cmp.is_empty()) {
        if resolved.entry.is_file() {
            return Err(Error::NotADirectory);
        }

        let dir = resolved.entry.start_cluster();
        let children = fs.read_dir(&resolved.entry)?;
        let (position, child) = children
            .into_iter()
            .enumerate()
            .find(|(_, child)| child.has_name(cmp))
            .ok_or(Error::NotFound)?;
        log::trace!("{cmp:?} found at slot {position} of cluster {dir}");

        resolved = Resolved {
            entry: child,
            parent: dir,
            position: Some(position),
        };
    }

    match (kind, resolved.entry.is_file()) {
        (PathKind::File, false) => Err(Error::IsADirectory),
        (PathKind::Dir, true) => Err(Error::NotADirectory),
        _ => Ok(resolved),
    }
}
