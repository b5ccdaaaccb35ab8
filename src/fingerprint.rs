/// Comment content fingerprints.
///
/// A fingerprint is the hash of the normalized author plus the normalized
/// body. It is the only key comments share across both stores: remote
/// comments carry an id the local file may not know yet, and local comments
/// may not exist remotely at all. Normalization makes the hash insensitive
/// to line-ending and whitespace differences introduced by either side.
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Normalize text for fingerprinting: NFC, unified newlines, collapsed
/// whitespace runs, trimmed.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let composed: String = unified.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint of a comment: SHA-256 over normalized author and body,
/// truncated to 16 hex chars.
pub fn comment_fingerprint(author: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(author).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(body).as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}
