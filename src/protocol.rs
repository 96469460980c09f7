//! Wire protocol
//!
//! Every datagram is `[sequence: u64 LE][payload]`. There is no length
//! prefix: the datagram boundary delimits the payload. The sequence number
//! doubles as the playout timestamp so the receiver can rebuild the capture
//! timeline from reordered or lossy delivery.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{FRAME_STEREO_SAMPLES, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::NetworkError;

/// A decoded datagram borrowing its payload from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub sequence: u64,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// Playout timestamp in stereo samples
    pub fn timestamp(&self) -> u64 {
        timestamp_for(self.sequence)
    }
}

/// Playout timestamp of a sequence number, in stereo samples
pub fn timestamp_for(sequence: u64) -> u64 {
    sequence.wrapping_mul(FRAME_STEREO_SAMPLES as u64)
}

/// Build a wire packet from a sequence number and payload
///
/// The payload must be non-empty: a header-only datagram is malformed.
pub fn encode(sequence: u64, payload: &[u8]) -> Result<Bytes, NetworkError> {
    if payload.is_empty() {
        return Err(NetworkError::MalformedPacket { len: HEADER_SIZE });
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(NetworkError::PacketTooLarge(payload.len()));
    }

    let mut packet = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    packet.put_u64_le(sequence);
    packet.put_slice(payload);
    Ok(packet.freeze())
}

/// Split a datagram into sequence number and payload
///
/// A datagram of `HEADER_SIZE` bytes or less carries no audio and is
/// rejected with [`NetworkError::MalformedPacket`].
pub fn decode(packet: &[u8]) -> Result<Packet<'_>, NetworkError> {
    if packet.len() <= HEADER_SIZE {
        return Err(NetworkError::MalformedPacket { len: packet.len() });
    }

    let mut header = &packet[..HEADER_SIZE];
    let sequence = header.get_u64_le();

    Ok(Packet {
        sequence,
        payload: &packet[HEADER_SIZE..],
    })
}
