//! Content identity: streaming SHA-256 over content bytes.
//!
//! The hash is the dedup key for artifacts. Computed once per successful
//! fetch, never recomputed or mutated.

use crate::error::{Error, Result};
use crate::model::ContentHash;
use sha2::{Digest, Sha256};
use std::io::Read;

/// Hash a readable source in fixed 8 KiB chunks.
///
/// Never buffers the whole payload; suitable for large files. I/O failure
/// while streaming surfaces as [`Error::Fetch`].
pub fn hash_reader(mut source: impl Read) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = source
            .read(&mut buffer)
            .map_err(|e| Error::Fetch(format!("read while hashing: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash an in-memory payload. Produces the same digest as [`hash_reader`]
/// over the same bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash(format!("{:x}", Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_identical_hash() {
        let a = hash_bytes(b"a dog on a beach");
        let b = hash_bytes(b"a dog on a beach");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_different_hash() {
        assert_ne!(hash_bytes(b"img1"), hash_bytes(b"img2"));
    }

    #[test]
    fn hash_is_64_lowercase_hex_chars() {
        let h = hash_bytes(b"anything");
        assert_eq!(h.0.len(), 64);
        assert!(h.0.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn streaming_matches_one_shot_across_chunk_boundary() {
        // 8192-byte chunks: make a payload that spans several.
        let payload = vec![0xABu8; 8192 * 3 + 17];
        let streamed = hash_reader(&payload[..]).unwrap();
        let one_shot = ContentHash(format!("{:x}", Sha256::digest(&payload)));
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash_bytes(b"").0,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
