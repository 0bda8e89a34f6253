use anyhow::{Result, bail};
use clap::Parser;
use tracing::*;

use crate::backup;
use crate::config::Configuration;
use crate::index::{Index, SqliteIndex};
use crate::snapshot;

/// Create a new snapshot of the configured source trees.
#[derive(Debug, Parser)]
pub struct Args {
    /// Override the YYYYMMDD_HHMM snapshot name
    /// (the current minute by default). Mostly for scripting.
    #[clap(long, value_name = "name")]
    timestamp: Option<String>,
}

pub fn run(config: &Configuration, args: Args) -> Result<()> {
    let name = args.timestamp.unwrap_or_else(snapshot::current_name);

    let mut index = match (config.db_enable, config.db_path.as_deref()) {
        (true, Some(path)) => Some(SqliteIndex::open(path)?),
        (true, None) => bail!("dbEnable is set but dbPath isn't"),
        (false, _) => None,
    };
    if index.is_some() {
        println!("Using database.");
    }

    let totals = backup::run(
        config,
        &name,
        index.as_mut().map(|i| i as &mut dyn Index),
    )?;
    debug!("Backed up {} source trees into {name}", totals.len());
    Ok(())
}
