//! Content fingerprints used as the ledger's duplicate key.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Streams the file through BLAKE3 and returns the lowercase hex digest.
///
/// The file is read in fixed-size pieces so multi-gigabyte videos never sit in
/// memory. Filesystem errors are returned untouched.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Seam used by the orchestrator so tests can observe when hashing happens.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Fingerprinter;

impl Fingerprinter for Blake3Fingerprinter {
    fn fingerprint(&self, path: &Path) -> io::Result<String> {
        fingerprint_file(path)
    }
}
