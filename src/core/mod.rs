//! Core types shared across every layer: constants, the error taxonomy,
//! and the transform trait contract. Always included regardless of which
//! cargo features are enabled.

pub mod constants;
pub mod error;
pub mod traits;

pub use constants::*;
pub use error::{ConfigError, CryptoError, EngineError, FramingError, HandshakeError, MeshtunError};
pub use traits::{Transform, TransformOutcome};
