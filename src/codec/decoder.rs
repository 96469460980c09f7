//! Opus decoder wrapper

use opus::{Channels, Decoder};

use super::FrameDecoder;
use crate::audio::frame::Frame;
use crate::constants::{FRAME_STEREO_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus decoder bound to 48 kHz stereo
pub struct OpusDecoder {
    decoder: Decoder,
    /// Frames decoded
    frames_decoded: u64,
    /// Packets that failed to decode
    frames_failed: u64,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8], out: &mut Frame) -> Result<(), CodecError> {
        let samples = match self.decoder.decode(payload, &mut out.samples, false) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_failed += 1;
                return Err(CodecError::DecodingFailed(e.to_string()));
            }
        };

        if samples != FRAME_STEREO_SAMPLES {
            self.frames_failed += 1;
            return Err(CodecError::InvalidFrameSize(samples));
        }

        self.frames_decoded += 1;
        Ok(())
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}
