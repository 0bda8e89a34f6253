#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use walkdir::WalkDir;

pub fn cli_run(config_path: &Path) -> Result<assert_cmd::Command> {
    let bin_name = env!("CARGO_PKG_NAME");
    let mut cmd = Command::cargo_bin(bin_name)?;
    cmd.arg("--config").arg(config_path);
    cmd.arg("-vvv");
    Ok(cmd)
}

/// Write a config backing up `sources` into `dest`,
/// with the index living next to the config when `db` is set.
pub fn write_config(
    dir: &Path,
    sources: &[&Path],
    dest: &Path,
    db: bool,
    link_mtime_differ: bool,
) -> Result<PathBuf> {
    let mut toml = String::from("backupDirFrom = [\n");
    for source in sources {
        toml.push_str(&format!("    \"{}\",\n", source.display()));
    }
    toml.push_str("]\n");
    toml.push_str(&format!("backupDirTo = \"{}\"\n", dest.display()));
    if db {
        toml.push_str("dbEnable = true\n");
        toml.push_str(&format!(
            "dbPath = \"{}\"\n",
            dir.join("goldfish.db").display()
        ));
    }
    if link_mtime_differ {
        toml.push_str("dbLinkMDiffer = true\n");
    }
    let path = dir.join("goldfish.toml");
    fs::write(&path, toml)?;
    Ok(path)
}

pub fn files_in(p: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(p)
        .into_iter()
        .map(|e| e.expect("couldn't walk dir"))
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

pub fn ino(p: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    p.symlink_metadata().expect("couldn't stat").ino()
}
