//! The uniform transform contract (§4.3) and the outcome types shared by
//! every stage of the pipeline.

use crate::core::error::EngineError;

/// Result of running one frame through a transform's `encode`/`decode`.
#[derive(Debug)]
pub enum TransformOutcome {
    /// Produced `len` bytes of output in the caller-provided buffer.
    Produced(usize),
    /// The transform consumed the frame but nothing should be forwarded
    /// (e.g. a shaper swallowing a frame to enforce its rate limit).
    Dropped,
}

/// A single stage in the egress/ingress transform stack.
///
/// Installed stages run head-to-tail on egress (local device -> remote)
/// and tail-to-head on ingress (remote -> local device); see
/// [`crate::transform::TransformStack`]. Every stage exposes the same
/// five-method contract regardless of what it does internally.
pub trait Transform: Send {
    /// Human-readable name, used in logging only.
    fn name(&self) -> &'static str;

    /// One-time setup performed before the link engine's event loop
    /// starts (e.g. deriving a session subkey, precomputing cipher
    /// state).
    fn init(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Transform a frame travelling from the local device toward the
    /// remote peer. `input` is the frame produced by the previous stage
    /// (or the raw device read for the first stage); the implementation
    /// writes its output into `output` and returns how many bytes it
    /// produced, or [`TransformOutcome::Dropped`] to silently discard the
    /// frame.
    fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError>;

    /// Transform a frame travelling from the remote peer toward the local
    /// device. Mirrors [`Transform::encode`] but runs in the reverse
    /// stack order.
    fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError>;

    /// Probe whether this stage is currently willing to accept an egress
    /// frame (e.g. a shaper whose token bucket is empty). Defaults to
    /// always-available.
    fn avail_encode(&self) -> bool {
        true
    }

    /// Probe whether this stage is currently willing to accept an ingress
    /// frame. Defaults to always-available.
    fn avail_decode(&self) -> bool {
        true
    }

    /// Release any resources (zeroize key material, flush buffers)
    /// before the stack is dropped. Called on every exit path from the
    /// link engine.
    fn teardown(&mut self) {}
}
