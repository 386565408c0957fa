//! The ordered transform stack (§4.3): compression, then AEAD, then
//! shaping, each exposing the uniform five-method [`Transform`] contract.
//!
//! Grounded on `original_source/linkfd.c`'s `lfd_run_down`/`lfd_run_up`
//! (stack traversal direction) and `lfd_check_down`/`lfd_check_up`
//! (AND-chained availability).

pub mod compression;
pub mod shaper;

pub use compression::CompressionTransform;
pub use shaper::ShaperTransform;

use crate::core::error::EngineError;
use crate::core::traits::{Transform, TransformOutcome};

/// An ordered pipeline of [`Transform`] stages.
///
/// Stages run head-to-tail on egress (device -> remote) and tail-to-head
/// on ingress (remote -> device), matching `lfd_run_down`/`lfd_run_up`'s
/// traversal order. Buffers are chained as owned `Vec<u8>`s between
/// stages rather than encoded in place with a reserved header prefix;
/// see DESIGN.md for why this deviation from the original's single
/// shared buffer was accepted.
pub struct TransformStack {
    stages: Vec<Box<dyn Transform>>,
}

impl TransformStack {
    /// Build a stack from stages in head-to-tail (egress) order.
    pub fn new(stages: Vec<Box<dyn Transform>>) -> Self {
        Self { stages }
    }

    /// Whether the stack has no stages at all (a bare, untransformed
    /// tunnel).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run each stage's one-time setup, head to tail.
    pub fn init(&mut self) -> Result<(), EngineError> {
        for stage in &mut self.stages {
            stage.init()?;
        }
        Ok(())
    }

    /// Whether every stage is currently willing to accept an egress
    /// frame. Short-circuits at the first stage that says no, matching
    /// `lfd_check_down`'s early-exit AND-chain.
    pub fn avail_encode(&self) -> bool {
        self.stages.iter().all(|stage| stage.avail_encode())
    }

    /// Whether every stage is currently willing to accept an ingress
    /// frame. Mirrors [`TransformStack::avail_encode`] for `lfd_check_up`.
    pub fn avail_decode(&self) -> bool {
        self.stages.iter().all(|stage| stage.avail_decode())
    }

    /// Run a frame from the local device through every stage head to
    /// tail. Returns `None` if any stage drops the frame.
    pub fn encode(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let mut buf = input.to_vec();
        let mut scratch = Vec::new();
        for stage in &mut self.stages {
            match stage.encode(&buf, &mut scratch)? {
                TransformOutcome::Produced(_) => std::mem::swap(&mut buf, &mut scratch),
                TransformOutcome::Dropped => return Ok(None),
            }
        }
        Ok(Some(buf))
    }

    /// Run a frame from the remote peer through every stage tail to
    /// head. Returns `None` if any stage drops the frame.
    pub fn decode(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let mut buf = input.to_vec();
        let mut scratch = Vec::new();
        for stage in self.stages.iter_mut().rev() {
            match stage.decode(&buf, &mut scratch)? {
                TransformOutcome::Produced(_) => std::mem::swap(&mut buf, &mut scratch),
                TransformOutcome::Dropped => return Ok(None),
            }
        }
        Ok(Some(buf))
    }

    /// Tear down every stage, head to tail, on any exit path from the
    /// link engine.
    pub fn teardown(&mut self) {
        for stage in &mut self.stages {
            stage.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefixer(u8);
    impl Transform for Prefixer {
        fn name(&self) -> &'static str {
            "prefixer"
        }
        fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            output.clear();
            output.push(self.0);
            output.extend_from_slice(input);
            Ok(TransformOutcome::Produced(output.len()))
        }
        fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            output.clear();
            output.extend_from_slice(&input[1..]);
            Ok(TransformOutcome::Produced(output.len()))
        }
    }

    struct AlwaysDrop;
    impl Transform for AlwaysDrop {
        fn name(&self) -> &'static str {
            "dropper"
        }
        fn encode(&mut self, _input: &[u8], _output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            Ok(TransformOutcome::Dropped)
        }
        fn decode(&mut self, _input: &[u8], _output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            Ok(TransformOutcome::Dropped)
        }
    }

    struct Unavailable;
    impl Transform for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            output.clear();
            output.extend_from_slice(input);
            Ok(TransformOutcome::Produced(output.len()))
        }
        fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
            output.clear();
            output.extend_from_slice(input);
            Ok(TransformOutcome::Produced(output.len()))
        }
        fn avail_encode(&self) -> bool {
            false
        }
    }

    #[test]
    fn encode_runs_head_to_tail_and_decode_reverses() {
        let mut stack = TransformStack::new(vec![Box::new(Prefixer(1)), Box::new(Prefixer(2))]);
        let encoded = stack.encode(b"x").unwrap().unwrap();
        // head (1) applied first, tail (2) applied last: [2, 1, b'x']
        assert_eq!(encoded, vec![2, 1, b'x']);

        let decoded = stack.decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, b"x");
    }

    #[test]
    fn a_dropping_stage_short_circuits_the_chain() {
        let mut stack = TransformStack::new(vec![Box::new(Prefixer(1)), Box::new(AlwaysDrop), Box::new(Prefixer(2))]);
        assert_eq!(stack.encode(b"x").unwrap(), None);
    }

    #[test]
    fn avail_encode_short_circuits_on_first_unavailable_stage() {
        let stack = TransformStack::new(vec![Box::new(Prefixer(1)), Box::new(Unavailable)]);
        assert!(!stack.avail_encode());
        assert!(stack.avail_decode());
    }

    #[test]
    fn empty_stack_passes_frames_through_unchanged() {
        let mut stack = TransformStack::new(vec![]);
        assert!(stack.is_empty());
        assert_eq!(stack.encode(b"x").unwrap().unwrap(), b"x");
    }
}
