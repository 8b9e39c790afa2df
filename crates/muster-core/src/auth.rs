//! Login challenge digests
//!
//! The host never receives the password itself. It sends a random nonce and
//! the peer answers with `hex(sha256(nonce || password))`.

use sha2::{Digest, Sha256};

/// Length of a login nonce in bytes
pub const NONCE_LEN: usize = 16;

/// Generate a fresh login nonce
pub fn new_nonce() -> Vec<u8> {
    rand::random::<[u8; NONCE_LEN]>().to_vec()
}

/// Digest a password against a nonce
pub fn challenge_digest(nonce: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a peer's answer to a challenge.
///
/// With no password configured every answer is accepted.
pub fn verify_digest(nonce: &[u8], password: Option<&str>, digest: Option<&str>) -> bool {
    match (password, digest) {
        (None, _) => true,
        (Some(password), Some(digest)) => {
            challenge_digest(nonce, password).eq_ignore_ascii_case(digest)
        }
        (Some(_), None) => false,
    }
}
