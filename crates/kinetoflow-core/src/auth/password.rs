//! Password hashing seam and opaque random tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Password hashing primitive.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Salted SHA-256, encoded as `sha256$<salt>$<digest>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SaltedSha256Hasher;

const SCHEME: &str = "sha256";

impl SaltedSha256Hasher {
    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PasswordHasher for SaltedSha256Hasher {
    fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let digest = Self::digest(&salt, password);
        format!("{}${}${}", SCHEME, salt, digest)
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let mut parts = hash.splitn(3, '$');
        let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if scheme != SCHEME {
            return false;
        }
        constant_time_eq(Self::digest(salt, password).as_bytes(), expected.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
