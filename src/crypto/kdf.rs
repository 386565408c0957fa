//! Passphrase-to-`Ak` key derivation: scrypt-SHA256, interactive
//! opslimit/memlimit, fixed salt — grounded on `auth.c`'s `derive_key`.

use scrypt::{scrypt, Params};

use crate::core::constants::{KDF_SALT, KEY_SIZE};
use crate::core::error::CryptoError;
use crate::crypto::keys::AuthKey;

/// "Interactive" scrypt cost parameters (`N = 2^14`, `r = 8`, `p = 1`),
/// matching libsodium's `crypto_pwhash_scryptsalsa208sha256` interactive
/// opslimit/memlimit pair used by the original `derive_key`.
fn interactive_params() -> Params {
    Params::new(14, 8, 1, KEY_SIZE).expect("fixed scrypt parameters are valid")
}

/// Derive `Ak` from a passphrase under the constant salt (32 bytes of
/// `0xD1`). The passphrase is *not* consumed here; callers own the
/// zeroize-on-drop lifecycle of the passphrase field in
/// [`crate::config::HostProfile`].
pub fn derive_auth_key(passphrase: &str) -> Result<AuthKey, CryptoError> {
    let mut out = [0u8; KEY_SIZE];
    scrypt(passphrase.as_bytes(), &KDF_SALT, &interactive_params(), &mut out)
        .map_err(|_| CryptoError::KdfFailed)?;
    Ok(AuthKey::from_bytes(out))
}

/// Caches `Ak` per host name so scrypt only runs once per host for the
/// process lifetime, per §3 ("created lazily on first use per host;
/// retained ... for the process lifetime").
#[derive(Default)]
pub struct AuthKeyCache {
    keys: std::sync::Mutex<std::collections::HashMap<String, AuthKey>>,
}

impl AuthKeyCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached `Ak` for `host`, deriving and caching it from
    /// `passphrase` on first use.
    pub fn get_or_derive(&self, host: &str, passphrase: &str) -> Result<AuthKey, CryptoError> {
        let mut keys = self.keys.lock().expect("auth key cache mutex poisoned");
        if let Some(existing) = keys.get(host) {
            return Ok(existing.clone());
        }
        let derived = derive_auth_key(passphrase)?;
        keys.insert(host.to_string(), derived.clone());
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_auth_key("correct horse").unwrap();
        let b = derive_auth_key("correct horse").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_passphrases_diverge() {
        let a = derive_auth_key("correct horse").unwrap();
        let b = derive_auth_key("correct horse!").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
