//! Filesystem plumbing: stat, hardlink, copy, and the odd syscall.

use std::fs;
use std::io;

use anyhow::{Context, Result, bail};
use byte_unit::{Byte, UnitType};
use camino::Utf8Path;
use filetime::FileTime;
use tracing::*;

/// What the snapshot planner wants to know about a file without opening it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: FileTime,
    /// True when the artifact is a symlink (only possible when symlinks
    /// aren't being followed).
    pub is_symlink: bool,
}

impl FileStat {
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            mtime: FileTime::from_last_modification_time(meta),
            is_symlink: meta.is_symlink(),
        }
    }

    /// mtime rounded to the nearest whole second.
    ///
    /// Some filesystems lose sub-second precision between the source and
    /// the destination, so every mtime equality check goes through this.
    pub fn rounded_mtime(&self) -> i64 {
        self.mtime.unix_seconds() + i64::from(self.mtime.nanoseconds() >= 500_000_000)
    }
}

fn metadata_of(path: &Utf8Path, follow_symlinks: bool) -> io::Result<fs::Metadata> {
    if follow_symlinks {
        path.metadata()
    } else {
        path.symlink_metadata()
    }
}

pub fn stat(path: &Utf8Path, follow_symlinks: bool) -> Result<FileStat> {
    let meta =
        metadata_of(path, follow_symlinks).with_context(|| format!("Couldn't stat {path}"))?;
    Ok(FileStat::of(&meta))
}

/// Stat `path` if it's an artifact we could link against:
/// a regular file, or (when not following) a symlink.
/// `None` if it's missing or a directory.
pub fn stat_linkable(path: &Utf8Path, follow_symlinks: bool) -> Result<Option<FileStat>> {
    let meta = match metadata_of(path, follow_symlinks) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Couldn't stat {path}")),
    };
    if meta.is_dir() {
        return Ok(None);
    }
    Ok(Some(FileStat::of(&meta)))
}

/// Hardlink `src` to `dst`.
///
/// A cross-device link is fatal: quietly falling back to a copy would stop
/// deduplicating, so the caller gets to hear about it instead.
pub fn hard_link(src: &Utf8Path, dst: &Utf8Path, follow_symlinks: bool) -> Result<()> {
    // linkat() doesn't dereference, so resolve the link ourselves
    // when we're asked to.
    let src = if follow_symlinks {
        src.canonicalize_utf8()
            .with_context(|| format!("Couldn't resolve {src}"))?
    } else {
        src.to_owned()
    };
    match fs::hard_link(&src, dst) {
        Ok(()) => Ok(()),
        // Once stabilized: e.kind() == ErrorKind::CrossesDevices
        Err(e) if e.raw_os_error() == Some(18) /* EXDEV */ => {
            bail!("Can't hardlink {src} to {dst}: destination is on a different filesystem")
        }
        Err(e) => Err(e).with_context(|| format!("Couldn't hardlink {src} to {dst}")),
    }
}

/// Copy `src` to `dst`, preserving permission bits and mtime.
/// A symlink is recreated as a symlink when symlinks aren't followed.
///
/// ACLs and extended attributes are not preserved.
pub fn copy_with_metadata(src: &Utf8Path, dst: &Utf8Path, follow_symlinks: bool) -> Result<()> {
    let meta =
        metadata_of(src, follow_symlinks).with_context(|| format!("Couldn't stat {src}"))?;
    if !follow_symlinks && meta.is_symlink() {
        let target = src
            .read_link_utf8()
            .with_context(|| format!("Couldn't read symlink {src}"))?;
        std::os::unix::fs::symlink(&target, dst)
            .with_context(|| format!("Couldn't symlink {dst} to {target}"))?;
    } else {
        let copied = fs::copy(src, dst)
            .with_context(|| format!("Couldn't copy {src} to {dst}"))?;
        trace!("Copied {copied} bytes from {src} to {dst}");
    }
    copy_metadata_only(src, dst, follow_symlinks)
}

/// Forward mtime (and permission bits, for regular files) from `src` onto
/// `dst` without touching its contents.
///
/// Used after copies, and to propagate a newer mtime onto an
/// already-linked inode, where every linked sibling sees the change.
pub fn copy_metadata_only(src: &Utf8Path, dst: &Utf8Path, follow_symlinks: bool) -> Result<()> {
    let meta =
        metadata_of(src, follow_symlinks).with_context(|| format!("Couldn't stat {src}"))?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    if !follow_symlinks && meta.is_symlink() {
        filetime::set_symlink_file_times(dst, atime, mtime)
            .with_context(|| format!("Couldn't set times on {dst}"))?;
    } else {
        fs::set_permissions(dst, meta.permissions())
            .with_context(|| format!("Couldn't set permissions on {dst}"))?;
        filetime::set_file_times(dst, atime, mtime)
            .with_context(|| format!("Couldn't set times on {dst}"))?;
    }
    Ok(())
}

/// Flush everything to stable storage before a tree is reported done.
pub fn sync_destination() {
    rustix::fs::sync();
}

pub fn nice_size(s: u64) -> String {
    format!("{:.2}", Byte::from_u64(s).get_appropriate_unit(UnitType::Binary))
}
