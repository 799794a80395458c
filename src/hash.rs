//! Content hashing shared by the uploader and the server.
//!
//! Both sides hash exactly the same byte range of a chunk with SHA-1 and
//! exchange the digest as lowercase hex.

use sha1::{Digest, Sha1};

/// hex length of a sha1 digest
pub const HASH_HEX_LEN: usize = 40;

/// sha1 of `data` as lowercase hex
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// compare a computed digest against one supplied by a peer.
/// peers may send uppercase hex, so the comparison ignores case.
pub fn hashes_match(computed: &str, claimed: &str) -> bool {
    computed.len() == claimed.len() && computed.eq_ignore_ascii_case(claimed)
}
