//! Snapshot directories: naming, listing, and finding the previous one.

use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

/// Snapshot directories are named for the minute their run started.
/// Lexicographic order of these names is chronological order,
/// which everything below leans on.
const NAME_FORMAT: &str = "%Y%m%d_%H%M";

pub fn current_name() -> String {
    jiff::Zoned::now().strftime(NAME_FORMAT).to_string()
}

/// Is this directory entry named like a snapshot?
/// The destination root can hold other things (the index, say).
pub fn is_snapshot_name(name: &str) -> bool {
    name.len() == 13 && jiff::civil::DateTime::strptime(NAME_FORMAT, name).is_ok()
}

/// All snapshot directories under `destination`, newest first.
pub fn list(destination: &Utf8Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in destination
        .read_dir_utf8()
        .with_context(|| format!("Couldn't list {destination}"))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() && is_snapshot_name(entry.file_name()) {
            found.push(entry.file_name().to_owned());
        }
    }
    found.sort_unstable_by(|a, b| b.cmp(a));
    Ok(found)
}

/// The most recent snapshot containing a folder named `folder`, if any.
///
/// A partial snapshot left by an interrupted run counts; missing files in
/// it just fall through to the hash path on the next run.
pub fn find_previous<'a>(
    destination: &Utf8Path,
    snapshots: &'a [String],
    folder: &str,
) -> Option<(&'a str, Utf8PathBuf)> {
    for name in snapshots {
        let candidate = destination.join(name).join(folder);
        if candidate.is_dir() {
            debug!("Previous snapshot of {folder}: {name}");
            return Some((name, candidate));
        }
    }
    debug!("No previous snapshot contains {folder}");
    None
}

/// Create the directory for this run's snapshot.
///
/// Two runs in the same minute collide on the name; that's an error here
/// rather than a guess at disambiguation.
pub fn create(destination: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
    ensure!(
        is_snapshot_name(name),
        "{name} isn't a YYYYMMDD_HHMM snapshot name"
    );
    let dir = destination.join(name);
    std::fs::create_dir(&dir).with_context(|| {
        format!("Couldn't create snapshot directory {dir} (a snapshot from the same minute?)")
    })?;
    Ok(dir)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    fn utf8(p: &std::path::Path) -> &Utf8Path {
        Utf8Path::from_path(p).unwrap()
    }

    #[test]
    fn names() {
        assert!(is_snapshot_name("20240229_1159"));
        assert!(!is_snapshot_name("20240230_1159")); // no Feb 30
        assert!(!is_snapshot_name("2024-02-29_1159"));
        assert!(!is_snapshot_name("goldfish.db"));
        assert!(!is_snapshot_name("20240229_115"));
    }

    #[test]
    fn current_name_parses_back() {
        assert!(is_snapshot_name(&current_name()));
    }

    #[test]
    fn listing_is_newest_first() -> Result<()> {
        let dir = tempdir()?;
        let dest = utf8(dir.path());
        for name in ["20240101_0000", "20240301_1234", "20240201_0630"] {
            fs::create_dir(dest.join(name))?;
        }
        // Noise that shouldn't be listed.
        fs::create_dir(dest.join("lost+found"))?;
        fs::write(dest.join("20240401_0000"), b"a file, not a snapshot")?;

        assert_eq!(
            list(dest)?,
            vec!["20240301_1234", "20240201_0630", "20240101_0000"]
        );
        Ok(())
    }

    #[test]
    fn previous_means_newest_with_that_folder() -> Result<()> {
        let dir = tempdir()?;
        let dest = utf8(dir.path());
        fs::create_dir_all(dest.join("20240101_0000").join("documents"))?;
        fs::create_dir_all(dest.join("20240201_0000").join("documents"))?;
        fs::create_dir_all(dest.join("20240301_0000").join("pictures"))?;
        let snapshots = list(dest)?;

        let (name, path) = find_previous(dest, &snapshots, "documents").unwrap();
        assert_eq!(name, "20240201_0000");
        assert_eq!(path, dest.join("20240201_0000").join("documents"));

        assert_eq!(find_previous(dest, &snapshots, "music"), None);
        Ok(())
    }

    #[test]
    fn same_minute_collides() -> Result<()> {
        let dir = tempdir()?;
        let dest = utf8(dir.path());
        create(dest, "20240101_0000")?;
        assert!(create(dest, "20240101_0000").is_err());
        assert!(create(dest, "not-a-snapshot").is_err());
        Ok(())
    }
}
