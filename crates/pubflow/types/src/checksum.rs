//! Content checksums
//!
//! 160-bit digests rendered as 40 lowercase hex characters. BLAKE3 in
//! extended-output mode is truncated to 20 bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Length of a rendered checksum
pub const CHECKSUM_HEX_LEN: usize = 40;

const DIGEST_LEN: usize = CHECKSUM_HEX_LEN / 2;

fn finish(hasher: &blake3::Hasher) -> String {
    let mut out = [0u8; DIGEST_LEN];
    hasher.finalize_xof().fill(&mut out);
    hex::encode(out)
}

/// Checksum of an in-memory buffer
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    finish(&hasher)
}

/// Checksum of a file, streamed in 64 KiB blocks
pub fn checksum_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(finish(&hasher))
}

/// Case-insensitive comparison of two rendered checksums
pub fn checksums_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
