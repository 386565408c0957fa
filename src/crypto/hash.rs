//! `H_k(·)`: Blake2b keyed hash truncated to 32 bytes, as used throughout
//! the handshake (§4.1) and the AEAD key schedule (§4.4).

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;

use crate::core::constants::HASH_SIZE;

type Blake2b256Mac = Blake2bMac<U32>;

/// Compute `H_k(data)` for a 32-byte key, over one or more concatenated
/// byte slices (avoids allocating the concatenation just to hash it).
pub fn keyed_hash(key: &[u8; 32], parts: &[&[u8]]) -> [u8; HASH_SIZE] {
    let mut mac = Blake2b256Mac::new_from_slice(key).expect("32-byte key is valid for Blake2bMac");
    for part in parts {
        mac.update(part);
    }
    let out = mac.finalize().into_bytes();
    let mut result = [0u8; HASH_SIZE];
    result.copy_from_slice(&out);
    result
}

/// Unkeyed Blake2b-256 hash, used once to derive `k_aead = H(Sk)` (§4.4).
pub fn unkeyed_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    use blake2::digest::Digest;
    use blake2::Blake2b;
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut result = [0u8; HASH_SIZE];
    result.copy_from_slice(&out);
    result
}

/// Constant-time equality, used for every MAC comparison in the
/// handshake so verification never leaks timing to an attacker.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_hash_is_deterministic_and_key_dependent() {
        let k1 = [0x11u8; 32];
        let k2 = [0x22u8; 32];
        let a = keyed_hash(&k1, &[b"hello"]);
        let b = keyed_hash(&k1, &[b"hello"]);
        let c = keyed_hash(&k2, &[b"hello"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn keyed_hash_over_parts_matches_concatenation() {
        let key = [0x33u8; 32];
        let concatenated = keyed_hash(&key, &[b"foobar"]);
        let split = keyed_hash(&key, &[b"foo", b"bar"]);
        assert_eq!(concatenated, split);
    }

    #[test]
    fn constant_time_eq_detects_any_bit_flip() {
        let a = [0xAAu8; 32];
        let mut b = a;
        assert!(constant_time_eq(&a, &b));
        b[17] ^= 0x01;
        assert!(!constant_time_eq(&a, &b));
    }
}
