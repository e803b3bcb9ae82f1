//! Content fingerprints.
//!
//! A [`Fingerprint`] is the lowercase hex SHA-256 digest of a file's bytes.
//! Only content is hashed: mtime, permissions and ownership never influence
//! the result, while any byte change (including CRLF vs LF) does.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default read size when streaming content into the hasher.
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

const HEX_LEN: usize = 64;

/// SHA-256 content digest, stored as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected fingerprint text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint {0:?}: expected {HEX_LEN} hex characters")]
pub struct InvalidFingerprint(pub String);

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidFingerprint(s.to_owned()))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Fingerprint an in-memory buffer.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(bytes);
    Fingerprint(format!("{digest:x}"))
}

/// Fingerprint a stream, reading at most `chunk_size` bytes at a time.
pub fn fingerprint_reader<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(Fingerprint(format!("{digest:x}")))
}

/// Fingerprint a file by streaming it in [`DEFAULT_CHUNK_SIZE`] chunks.
///
/// # Errors
///
/// The underlying open/read error, notably `NotFound` and `PermissionDenied`.
pub fn fingerprint_file(path: &Path) -> io::Result<Fingerprint> {
    fingerprint_file_chunked(path, DEFAULT_CHUNK_SIZE)
}

pub fn fingerprint_file_chunked(path: &Path, chunk_size: usize) -> io::Result<Fingerprint> {
    let file = std::fs::File::open(path)?;
    fingerprint_reader(file, chunk_size)
}

/// Fingerprint a file if it exists; `Ok(None)` when it does not.
pub fn fingerprint_if_exists(path: &Path, chunk_size: usize) -> io::Result<Option<Fingerprint>> {
    match fingerprint_file_chunked(path, chunk_size) {
        Ok(fp) => Ok(Some(fp)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Fingerprint many files in parallel. Output order matches `paths`.
pub fn fingerprint_files(paths: &[PathBuf], chunk_size: usize) -> Vec<io::Result<Option<Fingerprint>>> {
    paths
        .par_iter()
        .map(|path| fingerprint_if_exists(path, chunk_size))
        .collect()
}
