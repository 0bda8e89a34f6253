//! Walk source trees into a new snapshot, linking what we've seen before.
//!
//! Every file lands in the snapshot one of three ways:
//!
//! 1. hardlinked to the same relative path in the previous snapshot, when
//!    size and rounded mtime agree (no hashing needed),
//! 2. hardlinked to *any* indexed file with the same content,
//! 3. a byte copy.
//!
//! The index learns about each file as it's materialized, never before,
//! so a row always points at something that existed when it was written.

use std::fs;

use anyhow::{Context, Result, ensure};
use camino::Utf8Path;
use tracing::*;

use crate::config::Configuration;
use crate::file_util::{self, FileStat, nice_size};
use crate::hashing;
use crate::index::{BackupId, FolderId, HistoricFile, Index};
use crate::progress::ProgressLine;
use crate::snapshot;

/// Per-tree byte counters, printed after each source tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeTotals {
    /// Bytes that needed a full copy.
    pub copied: u64,
    /// Bytes hardlinked to the same path in the previous snapshot.
    pub linked: u64,
    /// Bytes hardlinked to indexed content elsewhere in the destination.
    pub hash_linked: u64,
}

/// Create the snapshot `name` under the configured destination.
///
/// Returns the per-tree totals, in configuration order.
pub fn run(
    config: &Configuration,
    name: &str,
    index: Option<&mut dyn Index>,
) -> Result<Vec<(String, TreeTotals)>> {
    let destination = &config.backup_dir_to;

    // The candidate set for "previous snapshot" lookups.
    // Grab it before we add ours.
    let snapshots = snapshot::list(destination)?;
    let today_dir = snapshot::create(destination, name)?;
    println!("Creating new backup: {name}");

    let mut session: Option<(&mut dyn Index, BackupId)> = match index {
        Some(idx) => {
            let backup_id = idx.new_backup(name)?;
            Some((idx, backup_id))
        }
        None => None,
    };

    let progress = ProgressLine::new();
    let mut totals = Vec::new();

    for source in &config.backup_dir_from {
        let folder = source
            .file_name()
            .with_context(|| format!("Source tree {source} has no name"))?;
        let folder_dir = today_dir.join(folder);
        fs::create_dir(&folder_dir).with_context(|| format!("Couldn't create {folder_dir}"))?;

        let previous = snapshot::find_previous(destination, &snapshots, folder);

        println!();
        println!("{folder}");
        println!("  From: {source}");
        println!("  To:   {folder_dir}");
        match &previous {
            Some((date, _)) => println!("  Previous backup found from: {date}"),
            None => println!("  No previous backup found."),
        }

        let tree_index = match session.as_mut() {
            Some((idx, backup_id)) => {
                let folder_id = idx.new_folder(folder, *backup_id)?;
                // The previous snapshot may predate the index entirely.
                let previous_folder = match &previous {
                    Some((date, _)) => match idx.get_backup(date)? {
                        Some(previous_backup) => idx.get_folder(folder, previous_backup)?,
                        None => None,
                    },
                    None => None,
                };
                Some(TreeIndex {
                    index: &mut **idx,
                    folder: folder_id,
                    previous_folder,
                })
            }
            None => None,
        };

        let mut tree = TreeBackup {
            destination,
            previous_folder_dir: previous.as_ref().map(|(_, dir)| dir.as_path()),
            follow_symlinks: config.follow_symlinks,
            link_mtime_differ: config.db_link_mtime_differ,
            index: tree_index,
            totals: TreeTotals::default(),
            progress: &progress,
        };
        tree.walk_dir(source, &folder_dir, Utf8Path::new(""))?;
        let tree_totals = tree.totals;

        file_util::sync_destination();

        println!("  Copied:      {}", nice_size(tree_totals.copied));
        println!("  Linked:      {}", nice_size(tree_totals.linked));
        println!("  Hash-linked: {}", nice_size(tree_totals.hash_linked));
        totals.push((folder.to_string(), tree_totals));
    }
    Ok(totals)
}

/// Index handles for one source tree: the freshly created folder row and,
/// when the index knows the previous snapshot, its folder row.
struct TreeIndex<'a> {
    index: &'a mut dyn Index,
    folder: FolderId,
    previous_folder: Option<FolderId>,
}

struct TreeBackup<'a> {
    /// Destination root, for resolving hash-link candidates.
    destination: &'a Utf8Path,
    /// This folder's directory inside the previous snapshot.
    previous_folder_dir: Option<&'a Utf8Path>,
    follow_symlinks: bool,
    link_mtime_differ: bool,
    index: Option<TreeIndex<'a>>,
    totals: TreeTotals,
    progress: &'a ProgressLine,
}

/// How one file made it into the snapshot.
enum Outcome {
    /// Fast path: hardlinked to its previous self.
    LinkedToPrevious,
    /// Hardlinked to indexed content somewhere else in the destination.
    HashLinked {
        to: HistoricFile,
        mtime_differs: bool,
    },
    /// Byte copy. If a same-content candidate was passed over because its
    /// mtime differed, it's named here.
    Copied { could_link: Option<HistoricFile> },
}

/// What came of looking for hash-link candidates.
enum HashLink {
    Linked {
        to: HistoricFile,
        mtime_differs: bool,
    },
    /// A candidate exists, but its mtime differs and we're configured not
    /// to link across that.
    Refused { candidate: HistoricFile },
    /// Nothing to link against: novel content, or every candidate is gone
    /// from disk.
    NoCandidates,
}

impl TreeBackup<'_> {
    /// Pre-order walk. Destination directories are created before we
    /// descend, so links and copies always have a parent.
    fn walk_dir(
        &mut self,
        src_dir: &Utf8Path,
        dst_dir: &Utf8Path,
        rel_dir: &Utf8Path,
    ) -> Result<()> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in src_dir
            .read_dir_utf8()
            .with_context(|| format!("Couldn't read {src_dir}"))?
        {
            let entry = entry?;
            // When following symlinks, a link to a directory is a
            // directory to descend into. Otherwise it's an artifact
            // like any other.
            let is_dir = if self.follow_symlinks {
                entry.path().is_dir()
            } else {
                entry.file_type()?.is_dir()
            };
            if is_dir {
                dirs.push(entry.file_name().to_owned());
            } else {
                files.push(entry.file_name().to_owned());
            }
        }
        // Walk in name order so runs are reproducible.
        files.sort_unstable();
        dirs.sort_unstable();

        for name in &files {
            self.back_up_file(&src_dir.join(name), &dst_dir.join(name), &rel_dir.join(name))?;
        }
        for name in &dirs {
            let sub_dst = dst_dir.join(name);
            fs::create_dir(&sub_dst).with_context(|| format!("Couldn't create {sub_dst}"))?;
            self.walk_dir(&src_dir.join(name), &sub_dst, &rel_dir.join(name))?;
        }
        Ok(())
    }

    fn back_up_file(&mut self, src: &Utf8Path, dst: &Utf8Path, rel: &Utf8Path) -> Result<()> {
        self.progress.working(rel);

        // The snapshot directory was born this run; anything already at
        // `dst` means two sources are fighting over one path.
        ensure!(
            dst.symlink_metadata().is_err(),
            "{dst} already exists in the fresh snapshot"
        );

        let stat = file_util::stat(src, self.follow_symlinks)?;
        let outcome = self.plan(src, dst, rel, &stat)?;
        self.progress.clear();

        match outcome {
            Outcome::LinkedToPrevious => {
                trace!("{rel}: linked to previous snapshot");
                self.totals.linked += stat.size;
            }
            Outcome::HashLinked { to, mtime_differs } => {
                self.totals.hash_linked += stat.size;
                println!("    {rel}");
                if mtime_differs {
                    println!(
                        "      hash-linked with different mtime with {}",
                        to.pretty()
                    );
                } else {
                    println!("      hash-linked with {}", to.pretty());
                }
            }
            Outcome::Copied { could_link } => {
                self.totals.copied += stat.size;
                println!("    {rel}");
                if let Some(to) = could_link {
                    println!(
                        "      may be hash-linked with different mtime with {}",
                        to.pretty()
                    );
                }
            }
        }
        Ok(())
    }

    /// The heart of the whole program: copy, link, or hash-link?
    fn plan(
        &mut self,
        src: &Utf8Path,
        dst: &Utf8Path,
        rel: &Utf8Path,
        stat: &FileStat,
    ) -> Result<Outcome> {
        // Fast path: the previous snapshot has this file at the same
        // relative path with matching size and mtime.
        if let Some(previous_dir) = self.previous_folder_dir {
            let previous = previous_dir.join(rel);
            if let Some(previous_stat) =
                file_util::stat_linkable(&previous, self.follow_symlinks)?
            {
                if previous_stat.size == stat.size
                    && previous_stat.is_symlink == stat.is_symlink
                    && previous_stat.rounded_mtime() == stat.rounded_mtime()
                {
                    file_util::hard_link(&previous, dst, self.follow_symlinks)?;
                    self.record_relinked(src, rel, stat)?;
                    return Ok(Outcome::LinkedToPrevious);
                }
            }
        }

        // Slow path. Without an index, all we can do is copy.
        let Some(ti) = self.index.as_mut() else {
            self.progress.marker('C');
            file_util::copy_with_metadata(src, dst, self.follow_symlinks)?;
            return Ok(Outcome::Copied { could_link: None });
        };

        self.progress.marker('H');
        let (digest, is_symlink) = hashing::hash_file(src, self.follow_symlinks)?;

        let (hash_id, attempt) = match ti.index.get_hash_id(&digest, stat.size, is_symlink)? {
            // Novel content.
            None => (
                ti.index.insert_hash(&digest, stat.size, is_symlink)?,
                HashLink::NoCandidates,
            ),
            Some(hash_id) => {
                let candidates = ti.index.get_files_by_hash(hash_id)?;
                let attempt = try_hash_link(
                    &candidates,
                    stat,
                    src,
                    dst,
                    self.destination,
                    self.follow_symlinks,
                    self.link_mtime_differ,
                )?;
                (hash_id, attempt)
            }
        };

        let outcome = match attempt {
            HashLink::Linked { to, mtime_differs } => Outcome::HashLinked { to, mtime_differs },
            HashLink::Refused { candidate } => {
                self.progress.marker('C');
                file_util::copy_with_metadata(src, dst, self.follow_symlinks)?;
                Outcome::Copied {
                    could_link: Some(candidate),
                }
            }
            HashLink::NoCandidates => {
                self.progress.marker('C');
                file_util::copy_with_metadata(src, dst, self.follow_symlinks)?;
                Outcome::Copied { could_link: None }
            }
        };

        // Link or copy, the index learns about the new instance either way.
        ti.index.insert_file(rel, ti.folder, hash_id)?;
        Ok(outcome)
    }

    /// Fast-path index bookkeeping: reuse the previous run's row when
    /// there is one, hash only when the previous snapshot predates
    /// the index.
    fn record_relinked(&mut self, src: &Utf8Path, rel: &Utf8Path, stat: &FileStat) -> Result<()> {
        let Some(ti) = self.index.as_mut() else {
            return Ok(());
        };
        let previous_row = match ti.previous_folder {
            Some(previous_folder) => ti.index.get_file(rel, previous_folder)?,
            None => None,
        };
        let hash_id = match previous_row {
            Some((_previous_file, hash_id)) => hash_id,
            None => {
                self.progress.marker('H');
                let (digest, is_symlink) = hashing::hash_file(src, self.follow_symlinks)?;
                match ti.index.get_hash_id(&digest, stat.size, is_symlink)? {
                    Some(hash_id) => hash_id,
                    None => ti.index.insert_hash(&digest, stat.size, is_symlink)?,
                }
            }
        };
        ti.index.insert_file(rel, ti.folder, hash_id)?;
        Ok(())
    }
}

/// Pass 1: link to a candidate whose rounded mtime matches ours.
/// Pass 2: settle for any candidate still on disk, linking it or refusing
/// per configuration.
fn try_hash_link(
    candidates: &[HistoricFile],
    stat: &FileStat,
    src: &Utf8Path,
    dst: &Utf8Path,
    destination: &Utf8Path,
    follow_symlinks: bool,
    link_mtime_differ: bool,
) -> Result<HashLink> {
    for candidate in candidates {
        let path = candidate.locate(destination);
        let Some(candidate_stat) = file_util::stat_linkable(&path, follow_symlinks)? else {
            continue;
        };
        if candidate_stat.rounded_mtime() == stat.rounded_mtime() {
            file_util::hard_link(&path, dst, follow_symlinks)?;
            return Ok(HashLink::Linked {
                to: candidate.clone(),
                mtime_differs: false,
            });
        }
    }

    for candidate in candidates {
        let path = candidate.locate(destination);
        let Some(candidate_stat) = file_util::stat_linkable(&path, follow_symlinks)? else {
            continue;
        };
        if !link_mtime_differ {
            return Ok(HashLink::Refused {
                candidate: candidate.clone(),
            });
        }
        file_util::hard_link(&path, dst, follow_symlinks)?;
        if stat.mtime > candidate_stat.mtime {
            // The shared inode takes the newer mtime;
            // every linked sibling sees it.
            file_util::copy_metadata_only(src, dst, follow_symlinks)?;
        }
        return Ok(HashLink::Linked {
            to: candidate.clone(),
            mtime_differs: true,
        });
    }
    Ok(HashLink::NoCandidates)
}
