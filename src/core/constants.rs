//! Protocol constants fixed by the wire format.
//!
//! These values are fixed by the protocol and MUST NOT be changed without
//! breaking compatibility with peers.

use std::time::Duration;

// =============================================================================
// FRAME SIZES
// =============================================================================

/// Maximum payload carried in a single frame. Bounded well under
/// [`FSIZE_MASK`]'s 12-bit range so that declared lengths between
/// `MAX_FRAME + MAX_OVERHEAD` and the mask's maximum remain
/// representable on the wire and trigger the oversize-drain path
/// (§3's "received frame whose declared length exceeds `MAX_FRAME +
/// MAX_OVERHEAD`" invariant) rather than being unreachable.
pub const MAX_FRAME: usize = 3840;

/// Worst-case overhead a transform stack may add on top of a payload
/// (compression header + AEAD tag + nonce + shaper slack).
pub const MAX_OVERHEAD: usize = 128;

/// Low 12 bits of the frame header word carry the payload length.
pub const FSIZE_MASK: u16 = 0x0FFF;

/// Bytes reserved at the front of a frame buffer for the length-prefix
/// header, so encode stages can prepend without copying.
pub const FRAME_RESERVE: usize = 2;

// =============================================================================
// CONTROL FRAME BITS
//
// Not present in the filtered original_source file set (vtun.h itself was
// excluded); these are the historically-stable vtun wire values, picked in
// DESIGN.md so a wire-compatible implementation is possible.
// =============================================================================

/// Echo-request control frame.
pub const FRAME_ECHO_REQ: u16 = 0x1000;

/// Echo-reply control frame.
pub const FRAME_ECHO_REP: u16 = 0x2000;

/// Malformed / oversized frame marker (never sent, only reported locally).
pub const FRAME_BAD: u16 = 0x4000;

/// Graceful connection-close notification.
pub const FRAME_CONN_CLOSE: u16 = 0x8000;

/// Mask selecting every defined control bit.
pub const FRAME_CONTROL_MASK: u16 = FRAME_ECHO_REQ | FRAME_ECHO_REP | FRAME_BAD | FRAME_CONN_CLOSE;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Curve25519 scalar / public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Curve25519 private scalar size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// BLAKE2b-256 keyed hash output size.
pub const HASH_SIZE: usize = 32;

/// `Ak`/`Sk` symmetric key size.
pub const KEY_SIZE: usize = 32;

/// AES-256-GCM key size.
pub const AEAD_KEY_SIZE: usize = 32;

/// AES-256-GCM nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// AES-256-GCM tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// `ckey` timestamp field width, big-endian.
pub const TS_SIZE: usize = 4;

/// `ckey = ts || cpk || H_Ak(ts || cpk)`.
pub const CKEY_SIZE: usize = TS_SIZE + PUBLIC_KEY_SIZE + HASH_SIZE;

/// `skey = spk || H_Ak(spk || h1)`.
pub const SKEY_SIZE: usize = PUBLIC_KEY_SIZE + HASH_SIZE;

/// scrypt salt: 32 bytes of the constant 0xD1, matching the original KDF.
pub const KDF_SALT: [u8; 32] = [0xD1; 32];

/// Lowest acceptable wall-clock time for AEAD nonce seeding (2015-10-08,
/// `MINIMUM_DATE` in `lfd_encrypt.c`). A clock reading before this is
/// treated as unreliable.
pub const NONCE_MINIMUM_DATE: u64 = 1_444_341_043;

/// How long to sleep when the clock is found to be before
/// [`NONCE_MINIMUM_DATE`], before falling back to an all-random nonce.
pub const NONCE_CLOCK_SLEEP: Duration = Duration::from_secs(10);

// =============================================================================
// HANDSHAKE WIRE LIMITS
// =============================================================================

/// Maximum length of a single handshake line, including terminator.
pub const HANDSHAKE_LINE_MAX: usize = 512;

/// Default handshake receive timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// FLAG STRING GRAMMAR
// =============================================================================

/// Flag strings (including the enclosing `<`/`>`) must stay below this
/// length, per the original `cf2bf`'s `strlen(str) >= 32` check.
pub const FLAG_STRING_MAX: usize = 32;

// =============================================================================
// LINK ENGINE TIMING
// =============================================================================

/// Default keep-alive probe interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive missed keep-alive probes tolerated before
/// the engine declares a network timeout.
pub const DEFAULT_KEEPALIVE_MAXFAIL: u32 = 3;

/// Default statistics flush interval.
pub const DEFAULT_STAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default connect timeout for the session supervisor.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before a persistent client retries a dropped connection.
pub const PERSIST_RECONNECT_DELAY: Duration = Duration::from_secs(5);
