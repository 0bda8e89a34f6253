use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result, anyhow, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use serde_derive::Deserialize;

/// Run configuration, read from `~/.config/goldfish.toml` by default.
///
/// Keys keep their historical camelCase names so old config files
/// keep working.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Source trees to back up, in order.
    #[serde(rename = "backupDirFrom")]
    pub backup_dir_from: Vec<Utf8PathBuf>,

    /// Destination root where the snapshot directories land.
    /// Must be one filesystem that supports hardlinks.
    #[serde(rename = "backupDirTo")]
    pub backup_dir_to: Utf8PathBuf,

    /// Dereference symlinks instead of backing up the links themselves.
    #[serde(rename = "followSymlinks", default)]
    pub follow_symlinks: bool,

    /// Turn on the content-addressed index.
    #[serde(rename = "dbEnable", default)]
    pub db_enable: bool,

    /// Where the index lives.
    #[serde(rename = "dbPath")]
    pub db_path: Option<Utf8PathBuf>,

    /// Hash-link files even when their mtimes disagree.
    #[serde(rename = "dbLinkMDiffer", default)]
    pub db_link_mtime_differ: bool,
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.backup_dir_from.is_empty(),
            "backupDirFrom lists no source trees"
        );
        let mut basenames = BTreeSet::new();
        for src in &self.backup_dir_from {
            ensure!(src.is_absolute(), "Source tree {src} isn't an absolute path");
            ensure!(src.is_dir(), "Source tree {src} isn't a directory");
            // Basenames name the per-tree directories inside each snapshot,
            // so they can't repeat.
            let name = src
                .file_name()
                .ok_or_else(|| anyhow!("Source tree {src} has no name"))?;
            ensure!(
                basenames.insert(name),
                "Source trees with matching names ({name}/) aren't supported"
            );
        }
        ensure!(
            self.backup_dir_to.is_absolute(),
            "Destination {} isn't an absolute path",
            self.backup_dir_to
        );
        ensure!(
            self.backup_dir_to.is_dir(),
            "Destination {} doesn't exist",
            self.backup_dir_to
        );
        if self.db_enable {
            ensure!(self.db_path.is_some(), "dbEnable is set but dbPath isn't");
        }
        Ok(())
    }
}

pub fn load(explicit: Option<&Utf8Path>) -> Result<Configuration> {
    let path = match explicit {
        Some(p) => p.to_owned(),
        None => default_path()?,
    };
    let s = fs::read_to_string(&path).with_context(|| format!("Couldn't open {path}"))?;
    let conf: Configuration =
        toml::from_str(&s).with_context(|| format!("Couldn't parse {path}"))?;
    conf.validate()?;
    Ok(conf)
}

fn default_path() -> Result<Utf8PathBuf> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "goldfish.toml"]);
    Ok(confpath)
}
