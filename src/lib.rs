//! # meshtun
//!
//! A point-to-point virtual tunnel between two hosts over an IP network.
//! A client-initiated session is mutually authenticated under a
//! pre-shared secret, negotiates a feature set, establishes an ephemeral
//! session key via Diffie-Hellman, and then bidirectionally forwards
//! frames between a local virtual network interface and a remote peer —
//! optionally compressing, authenticated-encrypting, and rate-shaping
//! the frames along the way.
//!
//! ## Modules
//!
//! - [`core`]: constants, the error taxonomy, and the [`core::Transform`]
//!   trait contract (always included).
//! - [`config`]: the flag-string grammar (§6, always included) and the
//!   static per-peer [`config::HostProfile`] (§3, requires `crypto`: the
//!   profile holds the passphrase in zeroizing storage).
//! - [`crypto`]: the four-message authentication handshake (§4.1) and the
//!   AES-256-GCM transform (§4.4). Requires `crypto`.
//! - [`framing`]: the stream and datagram frame codecs (§4.2). Requires
//!   `framing`.
//! - [`transform`]: the ordered compression/AEAD/shaper stack (§4.3).
//!   Requires `transform`.
//! - [`link`]: the event loop that drives one session's data path once
//!   the handshake has completed (§4.5). Requires `link`.
//! - [`supervisor`]: binds handshake output to engine configuration for
//!   both roles, and the client's reconnect policy (§4.6). Requires
//!   `client` or `server`.
//!
//! ## Feature flags
//!
//! - `crypto` (default): passphrase KDF, Curve25519 DH, AES-256-GCM.
//! - `framing` (default): stream and datagram frame codecs.
//! - `transform` (default): compression and shaper transform stages.
//! - `transport` (default): the `tokio` socket types the other layers
//!   build on.
//! - `link` (default): the link engine, implying the four above.
//! - `client` / `server` (default): the high-level session supervisors.

#![forbid(unsafe_code)]

pub mod core;

pub mod config;

#[cfg(feature = "crypto")]
pub mod crypto;

#[cfg(feature = "framing")]
pub mod framing;

#[cfg(feature = "transform")]
pub mod transform;

#[cfg(feature = "link")]
pub mod link;

#[cfg(any(feature = "client", feature = "server"))]
pub mod supervisor;

pub use crate::core::{ConfigError, CryptoError, EngineError, FramingError, HandshakeError, MeshtunError};

/// Convenient re-exports of the most commonly used types across layers.
pub mod prelude {
    pub use crate::core::{MeshtunError, Transform, TransformOutcome};

    #[cfg(feature = "crypto")]
    pub use crate::config::{Compression, FeatureFlags, HostProfile, HostProfileBuilder, InterfaceKind, Transport};

    #[cfg(feature = "link")]
    pub use crate::link::{LinkEngine, RemoteChannel, Termination};
}
