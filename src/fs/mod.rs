//! Filesystem capability and the full-path-to-mount registry (spec §4.2).
//!
//! The teacher's `fs` module (kept as `FsFile`/`FsDirectory`) models a rich, buffered,
//! cursor-based file abstraction with default-impl helpers for whole-file reads. The loader
//! only ever needs to read a whole file once into a critical allocation and close it (spec
//! §5: "file handles are opened, fully read into a critical buffer, then closed immediately.
//! No streaming."), so the capability surface here is the synchronous, unbuffered subset of
//! that trait: `open` / `read` / `size` / `close`, exactly as spec §4.2 states it, rather than
//! `FsFile`'s full cursor/seek/truncate/extend surface.

use crate::bootpath::{self, FullPath, Selector};
use crate::error::{IoError, PathError};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;

pub type IoResult<T> = Result<T, IoError>;

/// A single opened file handle on some mounted filesystem.
pub trait File: Debug {
    /// Read `len` bytes starting at `offset` into `buf[..len]`. Returns whether the read
    /// succeeded in full; a partial or failed read is always an error in this loader, there
    /// is no retry-with-fewer-bytes path.
    fn read(&mut self, buf: &mut [u8], offset: usize, len: usize) -> bool;

    fn size(&self) -> usize;
}

/// A mounted filesystem instance, capable of opening files by path within itself.
pub trait Filesystem: Debug {
    fn open(&self, path: &str) -> Option<Box<dyn File>>;

    /// Release any resources associated with `file`. The default just drops it; filesystems
    /// that need to flush or unlock something override this.
    fn close(&self, file: Box<dyn File>) {
        drop(file);
    }
}

/// Owned form of [`Selector`], used as a registry key since mounts outlive any one path
/// string being resolved against them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSelector {
    ImplicitBoot,
    Index(u64),
    Guid(String),
    Name(String),
}

impl MountSelector {
    fn matches(&self, other: &Selector<'_>) -> bool {
        match (self, other) {
            (MountSelector::ImplicitBoot, Selector::ImplicitBoot) => true,
            (MountSelector::Index(a), Selector::Index(b)) => a == b,
            (MountSelector::Guid(a), Selector::Guid(b)) => a.as_str() == *b,
            (MountSelector::Name(a), Selector::Name(b)) => a.as_str() == *b,
            _ => false,
        }
    }
}

struct MountEntry {
    disk: MountSelector,
    partition: MountSelector,
    fs: Box<dyn Filesystem>,
}

/// Registry mapping a resolved `(disk, partition)` identity to its mounted filesystem.
///
/// Built once during early boot from whatever concrete disks/partitions the firmware layer
/// enumerates; `fs_by_full_path` is the read-only lookup the rest of the loader uses.
#[derive(Default)]
pub struct FilesystemTable {
    mounts: Vec<MountEntry>,
}

impl FilesystemTable {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    pub fn register(&mut self, disk: MountSelector, partition: MountSelector, fs: Box<dyn Filesystem>) {
        self.mounts.push(MountEntry { disk, partition, fs });
    }

    /// Resolve a full path string to its mounted filesystem and the path within that
    /// partition. Returns `PathError` if the string itself is malformed, `IoError` if it is
    /// well-formed but no registered mount matches.
    pub fn fs_by_full_path<'p>(&self, path: &'p str) -> Result<(&dyn Filesystem, &'p str), FsLookupError> {
        let full = bootpath::parse_path(path).map_err(FsLookupError::Path)?;
        self.fs_by_parsed(&full)
    }

    pub fn fs_by_parsed<'p>(&self, full: &FullPath<'p>) -> Result<(&dyn Filesystem, &'p str), FsLookupError> {
        for mount in &self.mounts {
            if mount.disk.matches(&full.disk) && mount.partition.matches(&full.partition) {
                return Ok((mount.fs.as_ref(), full.path));
            }
        }
        Err(FsLookupError::Io(IoError::NoMountForPath))
    }

    /// Open, fully read, and close a file in one call — the only I/O pattern the loader
    /// needs (spec §5).
    pub fn read_whole_file(&self, path: &str, buf: &mut [u8]) -> Result<usize, FsLookupError> {
        let (fs, inner_path) = self.fs_by_full_path(path)?;
        let mut file = fs.open(inner_path).ok_or(FsLookupError::Io(IoError::NotFound))?;
        let size = file.size();
        if size > buf.len() {
            fs.close(file);
            return Err(FsLookupError::Io(IoError::ReadFailed));
        }
        let ok = file.read(buf, 0, size);
        fs.close(file);
        if ok {
            Ok(size)
        } else {
            Err(FsLookupError::Io(IoError::ReadFailed))
        }
    }
}

#[derive(Debug)]
pub enum FsLookupError {
    Path(PathError),
    Io(IoError),
}
