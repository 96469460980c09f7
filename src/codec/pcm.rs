//! Uncompressed PCM passthrough
//!
//! Payload is the frame's 480 samples as little-endian i16, 960 bytes.

use super::{FrameDecoder, FrameEncoder};
use crate::audio::frame::{EncodedFrame, Frame};
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PcmCodec;

impl FrameEncoder for PcmCodec {
    fn encode(&mut self, frame: &Frame, out: &mut EncodedFrame) -> Result<(), CodecError> {
        let len = frame.write_le_bytes(out.buffer_mut())?;
        out.set_len(len)?;
        out.sequence = frame.sequence;
        Ok(())
    }
}

impl FrameDecoder for PcmCodec {
    fn decode(&mut self, payload: &[u8], out: &mut Frame) -> Result<(), CodecError> {
        out.read_le_bytes(payload)
    }
}
