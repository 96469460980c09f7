//! Frame codecs
//!
//! The pipelines talk to codecs through [`FrameEncoder`] and
//! [`FrameDecoder`]. Opus is the default; raw PCM keeps the uncompressed
//! 960-byte wire format available.

pub mod decoder;
pub mod encoder;
pub mod pcm;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;
pub use pcm::PcmCodec;

use crate::audio::frame::{EncodedFrame, Frame};
use crate::config::{CodecConfig, CodecKind};
use crate::error::CodecError;

/// Compresses one captured frame
pub trait FrameEncoder: Send {
    /// Encode `frame` into `out`, copying its sequence number
    fn encode(&mut self, frame: &Frame, out: &mut EncodedFrame) -> Result<(), CodecError>;
}

/// Restores one frame from a wire payload
pub trait FrameDecoder: Send {
    /// Decode `payload` into `out.samples`
    fn decode(&mut self, payload: &[u8], out: &mut Frame) -> Result<(), CodecError>;
}

impl<T: FrameEncoder + ?Sized> FrameEncoder for Box<T> {
    fn encode(&mut self, frame: &Frame, out: &mut EncodedFrame) -> Result<(), CodecError> {
        (**self).encode(frame, out)
    }
}

impl<T: FrameDecoder + ?Sized> FrameDecoder for Box<T> {
    fn decode(&mut self, payload: &[u8], out: &mut Frame) -> Result<(), CodecError> {
        (**self).decode(payload, out)
    }
}

/// Build the encoder selected by `config`
pub fn build_encoder(config: &CodecConfig) -> Result<Box<dyn FrameEncoder>, CodecError> {
    Ok(match config.kind {
        CodecKind::Opus => Box::new(OpusEncoder::new(config)?),
        CodecKind::Pcm => Box::new(PcmCodec),
    })
}

/// Build the decoder selected by `config`
pub fn build_decoder(config: &CodecConfig) -> Result<Box<dyn FrameDecoder>, CodecError> {
    Ok(match config.kind {
        CodecKind::Opus => Box::new(OpusDecoder::new()?),
        CodecKind::Pcm => Box::new(PcmCodec),
    })
}
