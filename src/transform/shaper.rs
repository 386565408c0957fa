//! Egress rate-shaping transform stage (§4.3, `S<n>` flag), installed
//! last in the stack so it gates frames already compressed and
//! encrypted.
//!
//! `original_source/`'s `lfd_shaper.c` did not survive the file filter
//! that produced this crate's reference material, so the token-bucket
//! implementation below is this crate's own design rather than a direct
//! port — the shaping *contract* (an `avail_encode` gate the link engine
//! polls before attempting to send) is still grounded on
//! `linkfd.c`'s `lfd_check_down`, which treats the shaper exactly like
//! any other stage's availability probe.

use std::cell::Cell;
use std::time::{Duration, Instant};

use crate::core::error::EngineError;
use crate::core::traits::{Transform, TransformOutcome};

/// Token-bucket egress shaper. `avail_encode` must mutate the bucket
/// through a shared reference (the [`Transform`] trait only grants
/// `&self` there), hence the [`Cell`] fields rather than plain ones.
pub struct ShaperTransform {
    bytes_per_sec: f64,
    capacity: f64,
    tokens: Cell<f64>,
    last_refill: Cell<Instant>,
}

impl ShaperTransform {
    /// Build a shaper for the negotiated `S<n>` rate, given in kbit/s.
    /// The bucket's burst capacity is one second's worth of traffic at
    /// that rate.
    pub fn new(kbit_per_sec: u32) -> Self {
        let bytes_per_sec = (kbit_per_sec as f64) * 1000.0 / 8.0;
        Self {
            bytes_per_sec,
            capacity: bytes_per_sec,
            tokens: Cell::new(bytes_per_sec),
            last_refill: Cell::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill.get());
        if elapsed > Duration::ZERO {
            let added = elapsed.as_secs_f64() * self.bytes_per_sec;
            let refilled = (self.tokens.get() + added).min(self.capacity);
            self.tokens.set(refilled);
            self.last_refill.set(now);
        }
    }
}

impl Transform for ShaperTransform {
    fn name(&self) -> &'static str {
        "shaper"
    }

    fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        self.refill();
        if self.tokens.get() <= 0.0 {
            return Ok(TransformOutcome::Dropped);
        }
        self.tokens.set(self.tokens.get() - input.len() as f64);
        output.clear();
        output.extend_from_slice(input);
        Ok(TransformOutcome::Produced(output.len()))
    }

    fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        // The shaper only throttles what this host sends; inbound
        // traffic is the peer's own concern and passes through untouched.
        output.clear();
        output.extend_from_slice(input);
        Ok(TransformOutcome::Produced(output.len()))
    }

    fn avail_encode(&self) -> bool {
        self.refill();
        self.tokens.get() > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_starts_full_and_drains_on_encode() {
        let mut shaper = ShaperTransform::new(8); // 1000 bytes/sec
        assert!(shaper.avail_encode());
        let mut out = Vec::new();
        let outcome = shaper.encode(&vec![0u8; 900], &mut out).unwrap();
        assert!(matches!(outcome, TransformOutcome::Produced(900)));
        assert!(shaper.tokens.get() < 1000.0);
    }

    #[test]
    fn exhausted_bucket_drops_frames_until_refilled() {
        let mut shaper = ShaperTransform::new(8); // 1000 bytes/sec
        let mut out = Vec::new();
        shaper.encode(&vec![0u8; 1000], &mut out).unwrap();
        assert!(!shaper.avail_encode());

        let outcome = shaper.encode(&vec![0u8; 10], &mut out).unwrap();
        assert!(matches!(outcome, TransformOutcome::Dropped));
    }

    #[test]
    fn decode_always_passes_through() {
        let mut shaper = ShaperTransform::new(8);
        let mut out = Vec::new();
        shaper.decode(b"inbound", &mut out).unwrap();
        assert_eq!(out, b"inbound");
    }
}
