//! The authentication/key-exchange handshake and the AEAD transform
//! (§4.1, §4.4).

pub mod aead;
pub mod hash;
pub mod handshake;
pub mod kdf;
pub mod keys;

pub use aead::{AeadTransform, CipherId};
pub use handshake::{HandshakeOutput, HostLock, HostLookup, NoLock};
pub use keys::{AuthKey, EphemeralKeypair, SessionKey};
