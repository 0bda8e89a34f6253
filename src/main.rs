use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::Level;

use goldfish::config;
use goldfish::ui;

/// Incremental hardlink backups with content-addressed deduplication.
#[derive(Debug, Parser)]
#[clap(version, verbatim_doc_comment)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the configuration file
    /// (~/.config/goldfish.toml if not given)
    #[clap(short, long)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    Backup(ui::backup::Args),
    Snapshots(ui::snapshots::Args),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let config = config::load(args.config.as_deref())?;

    match args.subcommand {
        Subcommand::Backup(b) => ui::backup::run(&config, b),
        Subcommand::Snapshots(s) => ui::snapshots::run(&config, s),
    }
}

/// Spit log messages to stderr, keeping stdout for the progress stream.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
