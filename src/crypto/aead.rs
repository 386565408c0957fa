//! AES-256-GCM authenticated-encryption transform (§4.4), grounded on
//! `original_source/lfd_encrypt.c` for the exact nonce construction and
//! replay check, and on the teacher's
//! `crates/nomad-protocol/src/crypto/aead.rs` for the `Transform`-shaped
//! encrypt/decrypt wrapper around an AEAD crate.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::core::constants::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, NONCE_CLOCK_SLEEP, NONCE_MINIMUM_DATE};
use crate::core::error::{CryptoError, EngineError};
use crate::core::traits::{Transform, TransformOutcome};
use crate::crypto::hash::unkeyed_hash;
use crate::crypto::keys::SessionKey;

/// AEAD cipher identifiers negotiable via the `E<n>` flag token. Only
/// AES-256-GCM is implemented; the legacy block-cipher transform is an
/// explicit non-goal (§1), so this enum intentionally has one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CipherId {
    /// AES-256-GCM, 96-bit nonce, 128-bit tag.
    Aes256Gcm = 1,
}

impl CipherId {
    /// Parse a negotiated cipher identifier.
    pub fn from_u32(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::Aes256Gcm),
            _ => None,
        }
    }
}

/// A 12-byte AEAD nonce, incremented as a little-endian integer once per
/// egress frame.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NonceBytes([u8; AEAD_NONCE_SIZE]);

impl NonceBytes {
    fn increment(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
    }

    /// Strict little-endian integer comparison, matching
    /// `lfd_encrypt.c`'s `is_lower_or_equal`. The nonce is incremented as
    /// a little-endian integer (byte 0 is least significant, carrying
    /// into byte 1 and beyond), so monotonicity must be judged the same
    /// way: most-significant byte first, i.e. from the top of the array
    /// down. Comparing from index 0 upward would treat byte 0 as most
    /// significant and reject every frame immediately after it wraps.
    fn is_strictly_greater_than(&self, other: &NonceBytes) -> bool {
        for i in (0..AEAD_NONCE_SIZE).rev() {
            if self.0[i] > other.0[i] {
                return true;
            }
            if self.0[i] < other.0[i] {
                return false;
            }
        }
        false
    }
}

/// Seed the initial nonce exactly as `init_nonce` in `lfd_encrypt.c`
/// does: if the wall clock reads before [`NONCE_MINIMUM_DATE`], sleep and
/// fall back to an all-random nonce; otherwise seed the low three bytes
/// from `now << 2`, fill the rest with randomness, and XOR the low 2 bits
/// of byte 3 against a fresh random byte (the original reads this "random
/// byte" out of not-yet-initialized heap memory; we draw it explicitly).
fn init_nonce() -> NonceBytes {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

    if now < NONCE_MINIMUM_DATE {
        std::thread::sleep(NONCE_CLOCK_SLEEP);
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        return NonceBytes(nonce);
    }

    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce[4..]);

    let shifted = (now as u32).wrapping_shl(2);
    let time_bytes = shifted.to_le_bytes();
    nonce[0] = time_bytes[0];
    nonce[1] = time_bytes[1];
    nonce[2] = time_bytes[2];

    let mut rand_byte = [0u8; 1];
    OsRng.fill_bytes(&mut rand_byte);
    nonce[3] = (rand_byte[0] & 0x3) ^ time_bytes[3];

    NonceBytes(nonce)
}

/// The AEAD transform stage. Installed second in the stack (after
/// compression, before the shaper).
pub struct AeadTransform {
    session_key: Option<SessionKey>,
    cipher: Option<Aes256Gcm>,
    egress_nonce: NonceBytes,
    last_ingress_nonce: Option<NonceBytes>,
}

impl AeadTransform {
    /// Construct the transform with the handshake's session key. The key
    /// schedule (`k_aead = H(Sk)`, then zeroize `Sk`) runs in
    /// [`Transform::init`], matching the five-method contract's
    /// init/encode/decode/probe/teardown shape.
    pub fn new(session_key: SessionKey) -> Self {
        Self {
            session_key: Some(session_key),
            cipher: None,
            egress_nonce: NonceBytes([0u8; AEAD_NONCE_SIZE]),
            last_ingress_nonce: None,
        }
    }
}

impl Transform for AeadTransform {
    fn name(&self) -> &'static str {
        "aead"
    }

    fn init(&mut self) -> Result<(), EngineError> {
        let session_key = self
            .session_key
            .take()
            .ok_or_else(|| EngineError::Transform("aead transform initialized twice".into()))?;

        let mut k_aead = unkeyed_hash(session_key.as_bytes());
        drop(session_key); // zeroizes Sk on drop

        self.cipher = Some(Aes256Gcm::new_from_slice(&k_aead).map_err(|_| EngineError::Transform("bad AEAD key length".into()))?);
        k_aead.zeroize();

        self.egress_nonce = init_nonce();
        Ok(())
    }

    fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        let cipher = self.cipher.as_ref().ok_or_else(|| EngineError::Transform("aead not initialized".into()))?;
        let nonce = Nonce::from_slice(&self.egress_nonce.0);
        let ciphertext = cipher
            .encrypt(nonce, input)
            .map_err(|_| EngineError::Transform(CryptoError::EncryptionFailed.to_string()))?;

        output.clear();
        output.reserve(ciphertext.len() + AEAD_NONCE_SIZE);
        output.extend_from_slice(&ciphertext);
        output.extend_from_slice(&self.egress_nonce.0);
        self.egress_nonce.increment();

        Ok(TransformOutcome::Produced(output.len()))
    }

    fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        if input.len() < AEAD_TAG_SIZE + AEAD_NONCE_SIZE {
            return Err(EngineError::Transform(CryptoError::DecryptionFailed.to_string()));
        }
        let split = input.len() - AEAD_NONCE_SIZE;
        let (ciphertext, nonce_bytes) = input.split_at(split);
        let nonce = NonceBytes(nonce_bytes.try_into().expect("exact nonce width"));

        if let Some(last) = &self.last_ingress_nonce {
            if !nonce.is_strictly_greater_than(last) {
                return Err(EngineError::Transform(CryptoError::ReplayedNonce.to_string()));
            }
        }

        let cipher = self.cipher.as_ref().ok_or_else(|| EngineError::Transform("aead not initialized".into()))?;
        let aead_nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(aead_nonce, ciphertext)
            .map_err(|_| EngineError::Transform(CryptoError::DecryptionFailed.to_string()))?;

        self.last_ingress_nonce = Some(nonce);
        output.clear();
        output.extend_from_slice(&plaintext);
        Ok(TransformOutcome::Produced(output.len()))
    }

    fn teardown(&mut self) {
        self.cipher = None;
        self.session_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> AeadTransform {
        let mut t = AeadTransform::new(SessionKey::from_bytes([0x42; 32]));
        t.init().unwrap();
        t
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let mut enc = transform();
        let mut dec = transform();
        // Force identical nonce seeding for the round trip by copying it.
        dec.egress_nonce = enc.egress_nonce;
        let mut ciphertext = Vec::new();
        enc.encode(b"hello", &mut ciphertext).unwrap();

        let mut plaintext = Vec::new();
        let outcome = dec.decode(&ciphertext, &mut plaintext).unwrap();
        assert!(matches!(outcome, TransformOutcome::Produced(5)));
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn nonce_increments_monotonically() {
        let mut n = NonceBytes([0u8; AEAD_NONCE_SIZE]);
        let first = n;
        n.increment();
        assert!(n.is_strictly_greater_than(&first));
        n.increment();
        let second = n;
        n.increment();
        assert!(n.is_strictly_greater_than(&second));
    }

    #[test]
    fn nonce_comparison_survives_a_byte_zero_wrap() {
        // Byte 0 at its max; incrementing carries into byte 1. The LE
        // increment makes this numerically larger even though byte 0
        // itself drops from 255 to 0.
        let mut before = NonceBytes([0u8; AEAD_NONCE_SIZE]);
        before.0[0] = 255;
        let mut after = before;
        after.increment();
        assert_eq!(after.0[0], 0);
        assert_eq!(after.0[1], 1);
        assert!(after.is_strictly_greater_than(&before));
        assert!(!before.is_strictly_greater_than(&after));
    }

    #[test]
    fn replay_of_same_ciphertext_is_rejected() {
        let mut enc = transform();
        let mut dec = transform();
        dec.egress_nonce = enc.egress_nonce;

        let mut ciphertext = Vec::new();
        enc.encode(b"hello", &mut ciphertext).unwrap();

        let mut plaintext = Vec::new();
        dec.decode(&ciphertext, &mut plaintext).unwrap();

        let mut plaintext2 = Vec::new();
        let result = dec.decode(&ciphertext, &mut plaintext2);
        assert!(result.is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_tag_check() {
        let mut enc = transform();
        let mut dec = transform();
        dec.egress_nonce = enc.egress_nonce;

        let mut ciphertext = Vec::new();
        enc.encode(b"hello", &mut ciphertext).unwrap();
        ciphertext[0] ^= 0xFF;

        let mut plaintext = Vec::new();
        assert!(dec.decode(&ciphertext, &mut plaintext).is_err());
    }
}
