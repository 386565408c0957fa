//! Key material: the derived authentication key `Ak`, the per-handshake
//! session key `Sk`, and ephemeral Curve25519 keypairs.
//!
//! Grounded on `crypto/keys.rs`'s zeroizing keypair pattern; the shared
//! DH routine uses `x25519-dalek` exactly as the teacher does for its
//! static-key DH.

use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::core::constants::{KEY_SIZE, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// The derived authentication key `Ak` (§3): a fixed-length symmetric key
/// produced from the passphrase via scrypt. Used only as the key to the
/// keyed hash during the handshake; retained in zeroizable memory for the
/// process lifetime of the host it belongs to.
#[derive(Clone)]
pub struct AuthKey(Zeroizing<[u8; KEY_SIZE]>);

impl AuthKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// The session key `Sk` (§3): derived at the end of a successful
/// handshake by keyed-hashing the DH shared secret under `Ak`. Consumed
/// once by the AEAD transform's `init` (which hashes it again to derive
/// the AEAD subkey) and then dropped, which zeroizes it.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; KEY_SIZE]>);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// An ephemeral Curve25519 keypair generated fresh per handshake.
///
/// The private scalar is zeroized as soon as [`EphemeralKeypair::dh`] has
/// produced the shared secret, or on drop if `dh` was never called.
pub struct EphemeralKeypair {
    private: StaticSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EphemeralKeypair {
    /// Generate a new random ephemeral keypair.
    pub fn generate() -> Self {
        let mut scalar_bytes = [0u8; PRIVATE_KEY_SIZE];
        OsRng.fill_bytes(&mut scalar_bytes);
        let private = StaticSecret::from(scalar_bytes);
        scalar_bytes.zeroize();
        let public = PublicKey::from(&private);
        Self {
            private,
            public: *public.as_bytes(),
        }
    }

    /// The public point `csk·G`, sent on the wire.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute the Diffie-Hellman shared secret `DH(our_scalar, their_point)`.
    ///
    /// Returns `None` if the result is the all-zero point, which
    /// `x25519-dalek`'s contributory-behavior check surfaces for
    /// low-order public keys (the server-side "reject low-order cpk"
    /// requirement in §4.1).
    pub fn dh(self, remote_public: &[u8; PUBLIC_KEY_SIZE]) -> Option<[u8; 32]> {
        let remote = PublicKey::from(*remote_public);
        let shared = self.private.diffie_hellman(&remote);
        let bytes = *shared.as_bytes();
        if bytes == [0u8; 32] {
            None
        } else {
            Some(bytes)
        }
    }
}
