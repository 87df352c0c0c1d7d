//! 64-bit content hashing.
//!
//! The canonical object id is the first eight bytes of the SHA-256
//! digest interpreted big-endian, so byte 0 of the digest is the most
//! significant byte and `format!("{hash:016x}")` prints the digest's
//! leading hex characters unchanged.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{OglError, Result};

/// Hashes an in-memory buffer.
#[must_use]
pub fn hash64_buf(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Hashes a file's contents.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash64_file(path: &Path) -> Result<u64> {
    let mut file = std::fs::File::open(path).map_err(|e| OglError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer).map_err(|e| OglError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(head))
}

/// Formats a hash the way `root-ref` and `objects/` names spell it.
#[must_use]
pub fn hex16(hash: u64) -> String {
    format!("{hash:016x}")
}
