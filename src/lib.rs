//! # sndlink
//!
//! Low-latency point-to-point audio streaming over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDER (client) ────────────────────────────────┐
//! │                                                                                 │
//! │  ┌────────────┐  acquire_unmarked  ┌──────────┐  wait_marked  ┌──────────────┐  │
//! │  │  Capture   │ ─────────────────▶ │ Raw pool │ ────────────▶ │ Encode worker│  │
//! │  │  callback  │  copy + mark       │  (N=8)   │  ◀── unmark   │   (thread)   │  │
//! │  └────────────┘                    └──────────┘               └──────┬───────┘  │
//! │     5 ms, never blocks                                 wait_marked   │          │
//! │                                                    ┌──────────────┐  │          │
//! │                                                    │ Encoded pool │ ◀┘          │
//! │                                                    │ (marked=free)│             │
//! │                                                    └──────┬───────┘             │
//! │                                                           │ async send_to       │
//! │                                                           ▼ completion → mark   │
//! │                               [seq: u64 LE][payload ≤ 1024 bytes]               │
//! └───────────────────────────────────────────────────────────┼─────────────────────┘
//!                                                             │ UDP
//! ┌──────────────────────────────── RECEIVER (server) ────────┼─────────────────────┐
//! │                                                           ▼                     │
//! │  ┌────────────────┐  decode   ┌────────────────┐   put   ┌───────────────────┐  │
//! │  │  Receive loop  │ ────────▶ │ Codec decoder  │ ──────▶ │   Jitter buffer   │  │
//! │  │    (tokio)     │           └────────────────┘  (lock) │ reorder / conceal │  │
//! │  └───────┬────────┘                                      └─────────┬─────────┘  │
//! │          │ record arrival                                get + tick│ (lock)     │
//! │          ▼                                                         ▼            │
//! │  ┌────────────────┐   stale? → comfort silence      ┌───────────────────────┐   │
//! │  │   Staleness    │ ──────────────────────────────▶ │    Render callback    │   │
//! │  │    tracker     │                                 │     5 ms, bounded     │   │
//! │  └────────────────┘                                 └───────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate for capture, playback and the codec
    pub const SAMPLE_RATE: u32 = 48000;

    /// Interleaved channel count (stereo)
    pub const CHANNELS: u16 = 2;

    /// Frame duration in milliseconds
    pub const FRAME_MS: u32 = 5;

    /// Stereo samples (sample frames) per frame: 240
    pub const FRAME_STEREO_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

    /// Mono samples (i16 values) per frame: 480
    pub const FRAME_MONO_SAMPLES: usize = FRAME_STEREO_SAMPLES * CHANNELS as usize;

    /// Raw frame size on the wire: 960
    pub const FRAME_BYTES: usize = FRAME_MONO_SAMPLES * std::mem::size_of::<i16>();

    /// Upper bound for an encoded payload
    pub const MAX_PAYLOAD_SIZE: usize = 1024;

    /// Sequence number header in front of every payload
    pub const HEADER_SIZE: usize = std::mem::size_of::<u64>();

    /// Largest datagram we ever produce or accept
    pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

    /// Default UDP port
    pub const DEFAULT_PORT: u16 = 47213;

    /// Default slot pool capacity
    pub const DEFAULT_POOL_CAPACITY: usize = 8;

    /// Frames without a packet before the receiver falls back to silence
    pub const DEFAULT_STALE_FRAMES: u32 = 4;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Socket receive buffer requested by the server
    pub const DEFAULT_RECV_BUFFER_BYTES: usize = 1_000_000;
}
