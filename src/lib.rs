//! Some small smart backup system.
//!
//! Every run mirrors the configured source trees into a timestamped
//! snapshot directory, but unchanged files are hardlinks into previous
//! snapshots instead of copies. See the [`backup`] module for the
//! decision procedure that makes that work.

pub mod backup;
pub mod config;
pub mod file_util;
pub mod hashing;
pub mod index;
pub mod progress;
pub mod snapshot;

// CLI stuff:
pub mod ui;
