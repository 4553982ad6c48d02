//! Deterministic content identity for chunks (C1).
//!
//! `chunk_hash(url, index, text) = sha256(url + "#" + index + ":" + text)`,
//! lowercase hex. The point id is a namespace-less UUIDv3 seeded by the hash
//! bytes, matching Java's `UUID.nameUUIDFromBytes`: MD5 the input bytes
//! directly, then stamp the version/variant bits by hand.

use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Computes the lowercase-hex content hash for a chunk. Fails if the
/// resulting hash is blank.
pub fn chunk_hash(url: &str, index: u32, text: &str) -> anyhow::Result<String> {
    let input = format!("{url}#{index}:{text}");
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());
    if hash.trim().is_empty() {
        anyhow::bail!("computed chunk hash is blank");
    }
    Ok(hash)
}

/// Namespace-less UUIDv3 derived from the UTF-8 bytes of a hex hash string.
pub fn point_id(hash: &str) -> Uuid {
    uuid_v3_from_bytes(hash.as_bytes())
}

/// `UUIDv3.fromBytes(bytes)`: MD5 the bytes directly, then set the version
/// (3) and variant (RFC 4122) bits per RFC 4122 §4.3.
fn uuid_v3_from_bytes(bytes: &[u8]) -> Uuid {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    let mut digest: [u8; 16] = hasher.finalize().into();
    digest[6] = (digest[6] & 0x0f) | 0x30;
    digest[8] = (digest[8] & 0x3f) | 0x80;
    Uuid::from_bytes(digest)
}

/// Lowercase hex encoding for a byte slice.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = chunk_hash("http://x/a", 7, "hello").unwrap();
        let b = chunk_hash("http://x/a", 7, "hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_is_lowercase_hex_of_sha256() {
        let hash = chunk_hash("http://x/a", 7, "hello").unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn point_id_is_deterministic() {
        let hash = chunk_hash("http://x/a", 7, "hello").unwrap();
        let id1 = point_id(&hash);
        let id2 = point_id(&hash);
        assert_eq!(id1, id2);
        assert_eq!(id1.get_version_num(), 3);
    }

    #[test]
    fn different_inputs_yield_different_hashes() {
        let a = chunk_hash("http://x/a", 0, "hello").unwrap();
        let b = chunk_hash("http://x/a", 1, "hello").unwrap();
        assert_ne!(a, b);
    }
}
