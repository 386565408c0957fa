//! Error types, one enum per layer, aggregated into [`MeshtunError`].

use thiserror::Error;

/// Errors from the four-message authentication handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A line exceeded [`crate::core::constants::HANDSHAKE_LINE_MAX`] or
    /// didn't parse into the expected fields.
    #[error("malformed handshake line: {0}")]
    MalformedLine(String),

    /// A hex field didn't decode, or decoded to the wrong length.
    #[error("bad hex field {field}: expected {expected} bytes")]
    BadHex {
        /// Name of the offending field.
        field: &'static str,
        /// Expected decoded length.
        expected: usize,
    },

    /// `H_Ak` verification failed (client key binding, session binding, or
    /// flag-string binding).
    #[error("MAC verification failed at {0}")]
    MacMismatch(&'static str),

    /// The client's ephemeral public key decoded to a low-order point, or
    /// the computed DH shared secret was the all-zero point.
    #[error("invalid Diffie-Hellman contribution")]
    InvalidDhPoint,

    /// The peer closed the connection or sent an unexpected message for
    /// the current state.
    #[error("unexpected message in state {0}")]
    UnexpectedMessage(&'static str),

    /// The peer sent the literal `ERR` line.
    #[error("peer rejected the handshake")]
    PeerRejected,

    /// A named host has no matching profile.
    #[error("unknown host {0:?}")]
    UnknownHost(String),

    /// Another session already holds the host's single-connection lock.
    #[error("host {0:?} is already connected")]
    LockContention(String),

    /// A handshake receive did not complete within the configured timeout.
    #[error("handshake timed out waiting for {0}")]
    Timeout(&'static str),

    /// The negotiated flag string failed to parse.
    #[error("flag grammar error: {0}")]
    Flags(#[from] crate::config::flags::FlagParseError),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from key derivation and the AEAD transform.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The memory-hard KDF failed (allocation failure under its
    /// configured memlimit, most commonly).
    #[error("key derivation failed")]
    KdfFailed,

    /// AEAD encryption failed (should not happen for well-formed input;
    /// surfaced defensively).
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed: invalid tag, corrupted ciphertext, or the
    /// buffer was too short to contain a tag and nonce.
    #[error("AEAD decryption failed")]
    DecryptionFailed,

    /// The ingress nonce was not strictly greater than the last
    /// successfully decrypted nonce.
    #[error("replayed or out-of-order nonce")]
    ReplayedNonce,
}

/// Errors from the framing codecs.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The stream codec read fewer bytes than the frame declared before
    /// hitting EOF. Per REDESIGN FLAGS this is treated as a protocol
    /// error rather than returned as a silent partial frame.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes the frame declared.
        expected: usize,
        /// Bytes actually read before EOF.
        actual: usize,
    },

    /// The declared on-wire length didn't match the datagram actually
    /// received (datagram codec only).
    #[error("datagram length mismatch: header said {header}, got {actual}")]
    LengthMismatch {
        /// Length encoded in the header.
        header: usize,
        /// Length of the body actually read.
        actual: usize,
    },

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the link engine's event loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A transform in the stack returned a fatal (negative) result.
    #[error("transform pipeline error: {0}")]
    Transform(String),

    /// Framing-level error while reading or writing a frame.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// `ka_maxfail` consecutive keep-alive intervals elapsed with no
    /// ingress traffic.
    #[error("network timeout: no traffic within keep-alive window")]
    NetworkTimeout,

    /// Underlying I/O failure on either descriptor.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors constructing or validating a [`crate::config::HostProfile`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was missing from the builder.
    #[error("missing required field {0}")]
    MissingField(&'static str),

    /// A numeric field was out of its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Top-level meshtun error, aggregating every layer.
#[derive(Debug, Error)]
pub enum MeshtunError {
    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Framing error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Link engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error not already wrapped by a lower layer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
