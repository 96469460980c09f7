//! Fixed-size audio frames
//!
//! Both frame types live entirely inline so a slot pool can be allocated
//! once at startup and reused for the lifetime of a session.

use crate::constants::{FRAME_BYTES, FRAME_MONO_SAMPLES, MAX_PAYLOAD_SIZE};
use crate::error::CodecError;

/// One 5 ms frame of interleaved 16-bit stereo audio
#[derive(Clone)]
pub struct Frame {
    /// Capture sequence number
    pub sequence: u64,
    /// Interleaved samples, L R L R ...
    pub samples: [i16; FRAME_MONO_SAMPLES],
}

impl Frame {
    pub fn silent() -> Self {
        Self {
            sequence: 0,
            samples: [0; FRAME_MONO_SAMPLES],
        }
    }

    /// Copy a captured buffer into this frame, zero-padding a short buffer
    pub fn fill_from(&mut self, sequence: u64, samples: &[i16]) {
        let len = samples.len().min(FRAME_MONO_SAMPLES);
        self.sequence = sequence;
        self.samples[..len].copy_from_slice(&samples[..len]);
        self.samples[len..].fill(0);
    }

    /// Serialize samples as little-endian bytes, returning the byte count
    pub fn write_le_bytes(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        if out.len() < FRAME_BYTES {
            return Err(CodecError::InvalidFrameSize(out.len()));
        }
        for (chunk, sample) in out.chunks_exact_mut(2).zip(self.samples.iter()) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(FRAME_BYTES)
    }

    /// Load samples from little-endian bytes; the length must be exact
    pub fn read_le_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() != FRAME_BYTES {
            return Err(CodecError::InvalidFrameSize(bytes.len()));
        }
        for (sample, chunk) in self.samples.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(())
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::silent()
    }
}

/// A compressed (or raw) frame payload bounded at [`MAX_PAYLOAD_SIZE`]
#[derive(Clone)]
pub struct EncodedFrame {
    pub sequence: u64,
    len: usize,
    data: [u8; MAX_PAYLOAD_SIZE],
}

impl EncodedFrame {
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            len: 0,
            data: [0; MAX_PAYLOAD_SIZE],
        }
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole backing buffer for a codec to write into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set payload length after writing into [`buffer_mut`](Self::buffer_mut)
    pub fn set_len(&mut self, len: usize) -> Result<(), CodecError> {
        if len > MAX_PAYLOAD_SIZE {
            return Err(CodecError::InvalidFrameSize(len));
        }
        self.len = len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for EncodedFrame {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_pads_short_input() {
        let mut frame = Frame::silent();
        frame.samples.fill(7);
        frame.fill_from(5, &[1, 2, 3]);
        assert_eq!(frame.sequence, 5);
        assert_eq!(&frame.samples[..3], &[1, 2, 3]);
        assert!(frame.samples[3..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_le_bytes() {
        let mut frame = Frame::silent();
        frame.samples[0] = -2;
        frame.samples[1] = 0x0102;

        let mut bytes = [0u8; FRAME_BYTES];
        assert_eq!(frame.write_le_bytes(&mut bytes).unwrap(), FRAME_BYTES);
        assert!(frame.write_le_bytes(&mut bytes[..FRAME_BYTES - 1]).is_err());
        assert_eq!(&bytes[..4], &[0xfe, 0xff, 0x02, 0x01]);

        let mut back = Frame::silent();
        back.read_le_bytes(&bytes).unwrap();
        assert_eq!(back.samples[..], frame.samples[..]);

        assert!(back.read_le_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_encoded_len_bound() {
        let mut encoded = EncodedFrame::empty();
        assert!(encoded.is_empty());
        assert!(encoded.set_len(MAX_PAYLOAD_SIZE + 1).is_err());
        encoded.buffer_mut()[..2].copy_from_slice(&[9, 9]);
        encoded.set_len(2).unwrap();
        assert_eq!(encoded.payload(), &[9, 9]);
    }
}
