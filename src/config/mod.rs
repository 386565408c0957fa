//! Host configuration: the flag-string grammar (§6) and the static
//! per-peer [`HostProfile`] (§3).
//!
//! `flags` has no crypto-crate dependencies and is always available
//! alongside `core`; `host` holds the passphrase in `zeroize`'s
//! `Zeroizing` storage and so requires the `crypto` feature, which is
//! the only place `zeroize` is pulled in.

pub mod flags;

#[cfg(feature = "crypto")]
pub mod host;

pub use flags::{Compression, FeatureFlags, FlagParseError, InterfaceKind, Transport};

#[cfg(feature = "crypto")]
pub use host::{HostProfile, HostProfileBuilder, MultiConnectPolicy};
