//! Opus encoder wrapper
//!
//! Encodes fixed 5 ms stereo frames straight into a pool slot's buffer.

use opus::{Application, Channels, Encoder};

use super::FrameEncoder;
use crate::audio::frame::{EncodedFrame, Frame};
use crate::config::{CodecConfig, OpusApplication};
use crate::constants::SAMPLE_RATE;
use crate::error::CodecError;

/// Opus encoder bound to 48 kHz stereo
pub struct OpusEncoder {
    encoder: Encoder,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a new Opus encoder with the specified configuration
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Stereo, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, config)?;

        Ok(Self {
            encoder,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &CodecConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        if config.vbr {
            encoder
                .set_vbr_constraint(config.cvbr)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| {
                    CodecError::EncoderInit(format!("Failed to set packet loss: {}", e))
                })?;
        }

        Ok(())
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, frame: &Frame, out: &mut EncodedFrame) -> Result<(), CodecError> {
        let size = self
            .encoder
            .encode(&frame.samples, out.buffer_mut())
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        out.set_len(size)?;
        out.sequence = frame.sequence;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;
        Ok(())
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FRAME_BYTES, MAX_PAYLOAD_SIZE};

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new(&CodecConfig::default());
        assert!(encoder.is_ok());
    }

    #[test]
    fn test_encoding_compresses() {
        let mut encoder = OpusEncoder::new(&CodecConfig::default()).unwrap();
        let mut frame = Frame::silent();
        frame.sequence = 9;
        let mut out = EncodedFrame::empty();

        encoder.encode(&frame, &mut out).unwrap();

        assert_eq!(out.sequence, 9);
        assert!(!out.is_empty());
        assert!(out.len() < FRAME_BYTES);
        assert!(out.len() <= MAX_PAYLOAD_SIZE);
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_low_delay_profile() {
        let config = CodecConfig {
            application: OpusApplication::LowDelay,
            vbr: false,
            ..Default::default()
        };
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut out = EncodedFrame::empty();
        assert!(encoder.encode(&Frame::silent(), &mut out).is_ok());
    }
}
