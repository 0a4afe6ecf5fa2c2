//! Content fingerprints, the unit of change detection.
//!
//! A fingerprint records what a source file held the last time we looked.
//! Modification times are deliberately never consulted; only content (or
//! bare presence, for sources that are not content-tracked) decides
//! whether anything changed.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use std::io;
use std::path::Path;

/// Width of the fixed text encoding used in the cache file.
pub const ENCODED_WIDTH: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    /// The file did not exist when examined.
    NoSuchFile,
    /// The file existed; its contents were not examined (presence tracking).
    Present,
    /// SHA-256 digest of the file contents.
    Digest([u8; 32]),
}

impl Fingerprint {
    /// Fingerprint a file by reading its full contents.  A missing file
    /// yields `NoSuchFile`; any other I/O error propagates.
    pub fn of_contents(path: &str) -> io::Result<Fingerprint> {
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Fingerprint::NoSuchFile)
            }
            Err(err) => return Err(err),
        };
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Fingerprint::Digest(hasher.finalize().into()))
    }

    /// Fingerprint a file by presence alone.
    pub fn of_presence(path: &str) -> Fingerprint {
        if Path::new(path).exists() {
            Fingerprint::Present
        } else {
            Fingerprint::NoSuchFile
        }
    }

    pub fn missing(&self) -> bool {
        matches!(self, Fingerprint::NoSuchFile)
    }

    /// Fixed-width text form, used by the cache file.
    pub fn encode(&self) -> String {
        match self {
            Fingerprint::NoSuchFile => "-".repeat(ENCODED_WIDTH),
            Fingerprint::Present => "+".repeat(ENCODED_WIDTH),
            Fingerprint::Digest(bytes) => {
                let mut out = String::with_capacity(ENCODED_WIDTH);
                for b in bytes {
                    let _ = write!(out, "{:02x}", b);
                }
                out
            }
        }
    }

    /// Inverse of `encode`.  Returns None on any malformed input.
    pub fn decode(text: &str) -> Option<Fingerprint> {
        if text.len() != ENCODED_WIDTH {
            return None;
        }
        if text.bytes().all(|b| b == b'-') {
            return Some(Fingerprint::NoSuchFile);
        }
        if text.bytes().all(|b| b == b'+') {
            return Some(Fingerprint::Present);
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in text.as_bytes().chunks(2).enumerate() {
            bytes[i] = hex_val(pair[0])? << 4 | hex_val(pair[1])?;
        }
        Some(Fingerprint::Digest(bytes))
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::NoSuchFile => write!(f, "NoSuchFile"),
            Fingerprint::Present => write!(f, "Present"),
            Fingerprint::Digest(_) => write!(f, "Digest({}..)", &self.encode()[..8]),
        }
    }
}
