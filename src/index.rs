//! The deduplication index: which content already lives where.
//!
//! Four tables - backups, folders, hashes, files - let a run find *any*
//! previously captured file with a given `(digest, size, symlink)` triple
//! and hardlink against it instead of copying. Rows are append-only;
//! pruning is somebody else's job.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension};
use tracing::*;

use crate::hashing::ContentId;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BackupId(i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FolderId(i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HashId(i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileId(i64);

/// A file some previous run recorded, in pieces relative to the
/// destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricFile {
    pub file_id: FileId,
    pub backup: String,
    pub folder: String,
    pub path: Utf8PathBuf,
}

impl HistoricFile {
    /// Where this file should be under the destination root.
    pub fn locate(&self, destination: &Utf8Path) -> Utf8PathBuf {
        destination
            .join(&self.backup)
            .join(&self.folder)
            .join(&self.path)
    }

    /// `<snapshot>/<folder>/<path>`, as the progress stream prints it.
    pub fn pretty(&self) -> String {
        format!("{}/{}/{}", self.backup, self.folder, self.path)
    }
}

/// What the snapshot planner needs from a dedup index.
///
/// Kept as a trait so the planner doesn't care what's behind it;
/// tests can run against a database that never touches disk.
pub trait Index {
    fn new_backup(&mut self, datetime: &str) -> Result<BackupId>;
    fn get_backup(&self, datetime: &str) -> Result<Option<BackupId>>;

    fn new_folder(&mut self, name: &str, backup: BackupId) -> Result<FolderId>;
    fn get_folder(&self, name: &str, backup: BackupId) -> Result<Option<FolderId>>;

    fn get_hash_id(&self, id: &ContentId, size: u64, symlink: bool) -> Result<Option<HashId>>;
    fn insert_hash(&mut self, id: &ContentId, size: u64, symlink: bool) -> Result<HashId>;

    fn insert_file(&mut self, path: &Utf8Path, folder: FolderId, hash: HashId) -> Result<()>;
    fn get_file(&self, path: &Utf8Path, folder: FolderId) -> Result<Option<(FileId, HashId)>>;

    /// All historic files known to carry this content, oldest row first.
    fn get_files_by_hash(&self, hash: HashId) -> Result<Vec<HistoricFile>>;

    /// Every backup row, newest first. (For listing, not planning.)
    fn backups(&self) -> Result<Vec<(BackupId, String)>>;

    /// Folder names captured by the given backup.
    fn folders_of(&self, backup: BackupId) -> Result<Vec<String>>;
}

pub struct SqliteIndex {
    conn: Connection,
}

impl SqliteIndex {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        debug!("Opening index {path}");
        let conn =
            Connection::open(path).with_context(|| format!("Couldn't open index {path}"))?;
        Self::new(conn)
    }

    /// An index that never touches disk; backs the test suite.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn new(mut conn: Connection) -> Result<Self> {
        let tx = conn.transaction()?;
        let ver: i32 = tx.query_row("PRAGMA user_version", (), |r| r.get(0))?;
        if ver < 1 {
            tx.execute_batch(
                "CREATE TABLE backups (
                    id INTEGER PRIMARY KEY,
                    date TEXT NOT NULL UNIQUE
                ) STRICT;
                CREATE TABLE folders (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    backup_id INTEGER NOT NULL REFERENCES backups(id)
                ) STRICT;
                CREATE TABLE hashes (
                    id INTEGER PRIMARY KEY,
                    hash TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    symlink INTEGER NOT NULL
                ) STRICT;
                CREATE TABLE files (
                    id INTEGER PRIMARY KEY,
                    path TEXT NOT NULL,
                    folder_id INTEGER NOT NULL REFERENCES folders(id),
                    hash_id INTEGER NOT NULL REFERENCES hashes(id)
                ) STRICT;
                CREATE INDEX hashes_by_triple ON hashes(hash, size, symlink);
                CREATE INDEX files_by_folder ON files(folder_id, path);
                CREATE INDEX files_by_hash ON files(hash_id);",
            )?;
        }
        tx.execute("PRAGMA user_version=1", ())?;
        tx.commit()?;
        Ok(Self { conn })
    }
}

impl Index for SqliteIndex {
    fn new_backup(&mut self, datetime: &str) -> Result<BackupId> {
        let id = self
            .conn
            .query_row(
                "INSERT INTO backups(date) VALUES (?1) RETURNING id",
                [datetime],
                |r| r.get(0),
            )
            .with_context(|| format!("Couldn't insert backup {datetime}"))?;
        Ok(BackupId(id))
    }

    fn get_backup(&self, datetime: &str) -> Result<Option<BackupId>> {
        let id = self
            .conn
            .query_row("SELECT id FROM backups WHERE date = ?1", [datetime], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(id.map(BackupId))
    }

    fn new_folder(&mut self, name: &str, backup: BackupId) -> Result<FolderId> {
        let id = self
            .conn
            .query_row(
                "INSERT INTO folders(name, backup_id) VALUES (?1, ?2) RETURNING id",
                (name, backup.0),
                |r| r.get(0),
            )
            .with_context(|| format!("Couldn't insert folder {name}"))?;
        Ok(FolderId(id))
    }

    fn get_folder(&self, name: &str, backup: BackupId) -> Result<Option<FolderId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM folders WHERE name = ?1 AND backup_id = ?2",
                (name, backup.0),
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.map(FolderId))
    }

    fn get_hash_id(&self, id: &ContentId, size: u64, symlink: bool) -> Result<Option<HashId>> {
        let found = self
            .conn
            .query_row(
                "SELECT id FROM hashes WHERE hash = ?1 AND size = ?2 AND symlink = ?3",
                (id.to_string(), size, symlink),
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.map(HashId))
    }

    fn insert_hash(&mut self, id: &ContentId, size: u64, symlink: bool) -> Result<HashId> {
        let row = self
            .conn
            .query_row(
                "INSERT INTO hashes(hash, size, symlink) VALUES (?1, ?2, ?3) RETURNING id",
                (id.to_string(), size, symlink),
                |r| r.get(0),
            )
            .with_context(|| format!("Couldn't insert hash {id}"))?;
        Ok(HashId(row))
    }

    fn insert_file(&mut self, path: &Utf8Path, folder: FolderId, hash: HashId) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO files(path, folder_id, hash_id) VALUES (?1, ?2, ?3)",
                (path.as_str(), folder.0, hash.0),
            )
            .with_context(|| format!("Couldn't insert file {path}"))?;
        Ok(())
    }

    fn get_file(&self, path: &Utf8Path, folder: FolderId) -> Result<Option<(FileId, HashId)>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, hash_id FROM files WHERE path = ?1 AND folder_id = ?2",
                (path.as_str(), folder.0),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(found.map(|(f, h)| (FileId(f), HashId(h))))
    }

    fn get_files_by_hash(&self, hash: HashId) -> Result<Vec<HistoricFile>> {
        let files = self
            .conn
            .prepare(
                "SELECT files.id, backups.date, folders.name, files.path
                 FROM files
                 JOIN folders ON folders.id = files.folder_id
                 JOIN backups ON backups.id = folders.backup_id
                 WHERE files.hash_id = ?1
                 ORDER BY files.id",
            )?
            .query_map([hash.0], |r| {
                Ok(HistoricFile {
                    file_id: FileId(r.get(0)?),
                    backup: r.get(1)?,
                    folder: r.get(2)?,
                    path: Utf8PathBuf::from(r.get::<_, String>(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn backups(&self) -> Result<Vec<(BackupId, String)>> {
        let rows = self
            .conn
            .prepare("SELECT id, date FROM backups ORDER BY date DESC")?
            .query_map((), |r| Ok((BackupId(r.get(0)?), r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn folders_of(&self, backup: BackupId) -> Result<Vec<String>> {
        let rows = self
            .conn
            .prepare("SELECT name FROM folders WHERE backup_id = ?1 ORDER BY name")?
            .query_map([backup.0], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_index() -> SqliteIndex {
        SqliteIndex::open_in_memory().unwrap()
    }

    #[test]
    fn backups_and_folders() -> Result<()> {
        let mut idx = test_index();
        assert_eq!(idx.get_backup("20240101_0000")?, None);

        let b1 = idx.new_backup("20240101_0000")?;
        let b2 = idx.new_backup("20240102_0000")?;
        assert_eq!(idx.get_backup("20240101_0000")?, Some(b1));

        let f1 = idx.new_folder("documents", b1)?;
        let f2 = idx.new_folder("documents", b2)?;
        assert_ne!(f1, f2);
        assert_eq!(idx.get_folder("documents", b1)?, Some(f1));
        assert_eq!(idx.get_folder("pictures", b1)?, None);

        // Newest first.
        let all = idx.backups()?;
        assert_eq!(all[0].1, "20240102_0000");
        assert_eq!(all[1].1, "20240101_0000");
        assert_eq!(idx.folders_of(b1)?, vec!["documents".to_string()]);
        Ok(())
    }

    #[test]
    fn hash_triple_is_the_key() -> Result<()> {
        let mut idx = test_index();
        let id = ContentId::hash(b"target.txt");

        let h = idx.insert_hash(&id, 10, false)?;
        assert_eq!(idx.get_hash_id(&id, 10, false)?, Some(h));
        // Same digest, different size or symlink flag: different content.
        assert_eq!(idx.get_hash_id(&id, 11, false)?, None);
        assert_eq!(idx.get_hash_id(&id, 10, true)?, None);
        Ok(())
    }

    #[test]
    fn files_round_trip() -> Result<()> {
        let mut idx = test_index();
        let b1 = idx.new_backup("20240101_0000")?;
        let f1 = idx.new_folder("documents", b1)?;
        let h = idx.insert_hash(&ContentId::hash(b"x"), 1, false)?;

        let path = Utf8Path::new("notes/todo.txt");
        assert_eq!(idx.get_file(path, f1)?, None);
        idx.insert_file(path, f1, h)?;
        let (file_id, hash_id) = idx.get_file(path, f1)?.unwrap();
        assert_eq!(hash_id, h);

        let same = idx.get_files_by_hash(h)?;
        assert_eq!(
            same,
            vec![HistoricFile {
                file_id,
                backup: "20240101_0000".to_string(),
                folder: "documents".to_string(),
                path: path.to_owned(),
            }]
        );
        assert_eq!(
            same[0].locate(Utf8Path::new("/mnt/backup")),
            "/mnt/backup/20240101_0000/documents/notes/todo.txt"
        );
        assert_eq!(same[0].pretty(), "20240101_0000/documents/notes/todo.txt");
        Ok(())
    }

    #[test]
    fn candidates_come_back_in_insertion_order() -> Result<()> {
        let mut idx = test_index();
        let b1 = idx.new_backup("20240101_0000")?;
        let b2 = idx.new_backup("20240102_0000")?;
        let f1 = idx.new_folder("documents", b1)?;
        let f2 = idx.new_folder("documents", b2)?;
        let h = idx.insert_hash(&ContentId::hash(b"x"), 1, false)?;

        idx.insert_file(Utf8Path::new("a"), f1, h)?;
        idx.insert_file(Utf8Path::new("b"), f2, h)?;

        let same = idx.get_files_by_hash(h)?;
        assert_eq!(same.len(), 2);
        assert_eq!(same[0].path, "a");
        assert_eq!(same[1].path, "b");
        Ok(())
    }
}
