use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::Configuration;
use crate::index::{Index, SqliteIndex};
use crate::snapshot;

/// List snapshots found on disk and in the index, side by side.
///
/// A snapshot missing from one side usually means the index was enabled
/// partway through the destination's life, or somebody pruned by hand.
#[derive(Debug, Parser)]
pub struct Args {}

#[derive(Debug, Default)]
struct Presence {
    on_disk: bool,
    in_index: bool,
}

pub fn run(config: &Configuration, _args: Args) -> Result<()> {
    let destination = &config.backup_dir_to;

    // snapshot name -> folder name -> where we saw it
    let mut seen: BTreeMap<String, BTreeMap<String, Presence>> = BTreeMap::new();

    for name in snapshot::list(destination)? {
        let snapshot_dir = destination.join(&name);
        let folders = seen.entry(name).or_default();
        for entry in snapshot_dir
            .read_dir_utf8()
            .with_context(|| format!("Couldn't list {snapshot_dir}"))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                folders
                    .entry(entry.file_name().to_owned())
                    .or_default()
                    .on_disk = true;
            }
        }
    }

    if let (true, Some(db_path)) = (config.db_enable, config.db_path.as_deref()) {
        let index = SqliteIndex::open(db_path)?;
        for (backup_id, date) in index.backups()? {
            let folders = seen.entry(date).or_default();
            for folder in index.folders_of(backup_id)? {
                folders.entry(folder).or_default().in_index = true;
            }
        }
    }

    let folder_width = seen
        .values()
        .flat_map(|folders| folders.keys())
        .map(|name| name.len())
        .max()
        .unwrap_or(0)
        .max("Folder".len());

    println!(
        "{:<13}  {:<folder_width$}  {:^3}  {:^3}",
        "Datetime", "Folder", "HDD", "DB"
    );
    // Newest first, like every other listing.
    for (date, folders) in seen.iter().rev() {
        if folders.is_empty() {
            println!("{date}");
            continue;
        }
        let mut first = true;
        for (folder, presence) in folders {
            println!(
                "{:<13}  {:<folder_width$}  {:^3}  {:^3}",
                if first { date.as_str() } else { "" },
                folder,
                if presence.on_disk { "X" } else { "" },
                if presence.in_index { "X" } else { "" },
            );
            first = false;
        }
    }
    Ok(())
}
