//! Compression transform stage (§4.3, `C<n>`/`L<n>` flag family).
//!
//! Grounded on the teacher's `extensions/compression.rs` `Compressor` for
//! the threshold-skip-if-it-doesn't-shrink pattern, applied per frame
//! instead of per sync-message payload. `flate2` backs the `C<n>`
//! (deflate) family; `L<n>` (LZO) has no available crate in this
//! dependency stack, so it is mapped onto the teacher's own `zstd`
//! dependency rather than introducing a fabricated one — see DESIGN.md.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression as DeflateLevel;

use crate::config::flags::Compression;
use crate::core::error::EngineError;
use crate::core::traits::{Transform, TransformOutcome};

/// Below this size a frame is left uncompressed: the deflate/zstd framing
/// overhead would outweigh any savings. Matches the teacher's
/// `MIN_COMPRESS_SIZE`.
pub const MIN_COMPRESS_SIZE: usize = 64;

const TAG_RAW: u8 = 0;
const TAG_COMPRESSED: u8 = 1;

/// Compresses frames travelling in either direction, tagging each with a
/// one-byte marker so the peer knows whether to inflate it.
pub struct CompressionTransform {
    kind: Compression,
}

impl CompressionTransform {
    /// Build the stage for the negotiated compression family and level.
    pub fn new(kind: Compression) -> Self {
        Self { kind }
    }

    fn compress_body(&self, input: &[u8]) -> Result<Vec<u8>, EngineError> {
        match self.kind {
            Compression::Deflate(level) => {
                let mut encoder = DeflateEncoder::new(Vec::new(), DeflateLevel::new(level.clamp(1, 9)));
                encoder
                    .write_all(input)
                    .map_err(|e| EngineError::Transform(format!("deflate compress: {e}")))?;
                encoder.finish().map_err(|e| EngineError::Transform(format!("deflate compress: {e}")))
            }
            Compression::Lzo(level) => {
                zstd::encode_all(input, level.clamp(1, 22) as i32).map_err(|e| EngineError::Transform(format!("zstd compress: {e}")))
            }
        }
    }

    fn decompress_body(&self, input: &[u8]) -> Result<Vec<u8>, EngineError> {
        match self.kind {
            Compression::Deflate(_) => {
                let mut decoder = DeflateDecoder::new(input);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| EngineError::Transform(format!("deflate decompress: {e}")))?;
                Ok(out)
            }
            Compression::Lzo(_) => zstd::decode_all(input).map_err(|e| EngineError::Transform(format!("zstd decompress: {e}"))),
        }
    }
}

impl Transform for CompressionTransform {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn encode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        output.clear();
        if input.len() < MIN_COMPRESS_SIZE {
            output.push(TAG_RAW);
            output.extend_from_slice(input);
            return Ok(TransformOutcome::Produced(output.len()));
        }

        let compressed = self.compress_body(input)?;
        if compressed.len() >= input.len() {
            output.push(TAG_RAW);
            output.extend_from_slice(input);
        } else {
            output.push(TAG_COMPRESSED);
            output.extend_from_slice(&compressed);
        }
        Ok(TransformOutcome::Produced(output.len()))
    }

    fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<TransformOutcome, EngineError> {
        let (tag, body) = input
            .split_first()
            .ok_or_else(|| EngineError::Transform("empty frame in compression stage".into()))?;
        output.clear();
        match *tag {
            TAG_RAW => output.extend_from_slice(body),
            TAG_COMPRESSED => output.extend_from_slice(&self.decompress_body(body)?),
            other => return Err(EngineError::Transform(format!("unknown compression tag {other}"))),
        }
        Ok(TransformOutcome::Produced(output.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frames_pass_through_uncompressed() {
        let mut t = CompressionTransform::new(Compression::Deflate(6));
        let mut out = Vec::new();
        t.encode(b"short", &mut out).unwrap();
        assert_eq!(out[0], TAG_RAW);

        let mut plain = Vec::new();
        t.decode(&out, &mut plain).unwrap();
        assert_eq!(plain, b"short");
    }

    #[test]
    fn repetitive_frames_round_trip_through_deflate() {
        let mut t = CompressionTransform::new(Compression::Deflate(6));
        let data = vec![b'a'; 4096];
        let mut out = Vec::new();
        t.encode(&data, &mut out).unwrap();
        assert_eq!(out[0], TAG_COMPRESSED);
        assert!(out.len() < data.len());

        let mut plain = Vec::new();
        t.decode(&out, &mut plain).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn repetitive_frames_round_trip_through_lzo_family() {
        let mut t = CompressionTransform::new(Compression::Lzo(3));
        let data = vec![b'z'; 4096];
        let mut out = Vec::new();
        t.encode(&data, &mut out).unwrap();
        assert_eq!(out[0], TAG_COMPRESSED);

        let mut plain = Vec::new();
        t.decode(&out, &mut plain).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn incompressible_frames_fall_back_to_raw_tag() {
        let mut t = CompressionTransform::new(Compression::Deflate(6));
        let data: Vec<u8> = (0..200u32).map(|i| ((i * 2654435761) % 256) as u8).collect();
        let mut out = Vec::new();
        t.encode(&data, &mut out).unwrap();
        // Either tag is legal depending on whether deflate happened to
        // shrink this particular pseudo-random sequence; round trip must
        // still hold.
        let mut plain = Vec::new();
        t.decode(&out, &mut plain).unwrap();
        assert_eq!(plain, data);
    }
}
