//! Hash the things we deduplicate on: file contents and symlink targets.

use std::fmt;
use std::fs::File;
use std::io::prelude::*;

use anyhow::{Context, Result};
use camino::Utf8Path;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256, digest::Output};

type Sha256Digest = Output<Sha256>;

/// The hash (a SHA256) used to identify file contents in the index.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContentId {
    digest: Sha256Digest,
}

impl ContentId {
    /// Calculates an ID from the given bytes
    pub fn hash(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes),
        }
    }

    fn from_digest(digest: Sha256Digest) -> Self {
        Self { digest }
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ digest: {} }}", HEXLOWER.encode(&self.digest))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Digest a file's contents, streamed in chunks.
///
/// When `follow_symlinks` is off and `path` is a symlink, the digest is
/// taken over the raw target bytes instead. A symlink whose target text
/// matches some file's contents must not collide with it, so the returned
/// flag says which kind of artifact was hashed.
pub fn hash_file(path: &Utf8Path, follow_symlinks: bool) -> Result<(ContentId, bool)> {
    let meta = path
        .symlink_metadata()
        .with_context(|| format!("Couldn't stat {path}"))?;

    if !follow_symlinks && meta.is_symlink() {
        let target = path
            .read_link_utf8()
            .with_context(|| format!("Couldn't read symlink {path}"))?;
        return Ok((ContentId::hash(target.as_str().as_bytes()), true));
    }

    let mut fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let count = fh
            .read(&mut buf)
            .with_context(|| format!("Couldn't read {path}"))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }
    Ok((ContentId::from_digest(hasher.finalize()), false))
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    const ABC: &[u8] = b"abc";

    const EXPECTED: &[u8] =
        &hex_literal::hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");

    #[test]
    fn smoke() {
        let id = ContentId::hash(ABC);
        assert_eq!(id.digest.as_slice(), EXPECTED);
    }

    #[test]
    fn file_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("abc.txt");
        fs::write(&path, ABC)?;

        let (id, symlink) = hash_file(Utf8Path::from_path(&path).unwrap(), false)?;
        assert_eq!(id, ContentId::hash(ABC));
        assert!(!symlink);
        Ok(())
    }

    #[test]
    fn symlink_target_bytes() -> Result<()> {
        let dir = tempdir()?;
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("target.txt", &link)?;

        // The digest covers the target *string*, not whatever it points at
        // (here, nothing).
        let (id, symlink) = hash_file(Utf8Path::from_path(&link).unwrap(), false)?;
        assert_eq!(id, ContentId::hash(b"target.txt"));
        assert!(symlink);
        Ok(())
    }
}
