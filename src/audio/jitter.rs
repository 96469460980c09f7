//! Jitter buffer
//!
//! The playout pipeline only depends on the [`JitterBuffer`] trait:
//! `put` frames as they arrive, `get` the frame for the current playout
//! position, `tick` to advance one frame period. [`ReorderBuffer`] is a
//! fixed-window implementation: it reorders within its capacity, plays
//! silence for frames that never arrived and resynchronises when the
//! sender restarts or jumps far ahead.

use crate::constants::FRAME_MONO_SAMPLES;

/// Outcome of a [`JitterBuffer::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStatus {
    /// The expected frame was present
    Ok,
    /// The expected frame is missing; output was concealed with silence
    Missing,
    /// Not enough frames buffered yet to start playout
    Buffering,
}

/// Reorder/conceal buffer between the receive path and the render path
pub trait JitterBuffer: Send {
    /// Insert one decoded frame of interleaved samples
    fn put(&mut self, payload: &[i16], timestamp: u64, sequence: u64);

    /// Write the frame at the current playout position into `output`
    ///
    /// `frame_size` is in stereo samples.
    fn get(&mut self, output: &mut [i16], frame_size: usize) -> JitterStatus;

    /// Advance the playout position by one frame period
    fn tick(&mut self);

    /// Drop everything buffered and restart playout at the next arrival
    fn reset(&mut self);

    fn stats(&self) -> JitterBufferStats;
}

struct Entry {
    occupied: bool,
    sequence: u64,
    timestamp: u64,
    samples: [i16; FRAME_MONO_SAMPLES],
}

impl Entry {
    fn empty() -> Self {
        Self {
            occupied: false,
            sequence: 0,
            timestamp: 0,
            samples: [0; FRAME_MONO_SAMPLES],
        }
    }
}

/// Fixed-capacity reorder window keyed by sequence number
pub struct ReorderBuffer {
    /// Entries indexed by sequence modulo capacity
    entries: Box<[Entry]>,
    /// Mask for fast modulo
    mask: u64,
    /// Sequence at the playout position, `None` until playout starts
    next_sequence: Option<u64>,
    /// Lowest sequence seen while waiting to start
    lowest_pending: Option<u64>,
    /// Frames buffered before playout starts
    min_delay: usize,
    level: usize,
    /// Timestamp of the last frame handed out
    last_timestamp: u64,
    received: u64,
    lost: u64,
    late: u64,
    duplicates: u64,
    resyncs: u64,
}

impl ReorderBuffer {
    /// Create a new reorder buffer
    /// capacity must be a power of 2
    pub fn new(capacity: usize, min_delay: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");
        assert!(min_delay <= capacity, "min_delay cannot exceed capacity");

        Self {
            entries: (0..capacity).map(|_| Entry::empty()).collect(),
            mask: capacity as u64 - 1,
            next_sequence: None,
            lowest_pending: None,
            min_delay: min_delay.max(1),
            level: 0,
            last_timestamp: 0,
            received: 0,
            lost: 0,
            late: 0,
            duplicates: 0,
            resyncs: 0,
        }
    }

    fn capacity(&self) -> u64 {
        self.mask + 1
    }

    fn resync(&mut self, sequence: u64) {
        tracing::debug!(
            "Jitter buffer resync at sequence {} (was {:?})",
            sequence,
            self.next_sequence
        );
        self.resyncs += 1;
        self.reset();
    }

    /// Timestamp of the most recently played frame
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }
}

impl JitterBuffer for ReorderBuffer {
    fn put(&mut self, payload: &[i16], timestamp: u64, sequence: u64) {
        if let Some(next) = self.next_sequence {
            if sequence < next {
                if next - sequence > self.capacity() {
                    // Far behind the playout position: the sender restarted
                    self.resync(sequence);
                } else {
                    self.late += 1;
                    return;
                }
            } else if sequence - next >= self.capacity() {
                // Too far ahead to fit the window
                self.resync(sequence);
            }
        }

        if self.next_sequence.is_none() {
            self.lowest_pending = Some(match self.lowest_pending {
                Some(lowest) => lowest.min(sequence),
                None => sequence,
            });
        }

        let index = (sequence & self.mask) as usize;
        let entry = &mut self.entries[index];
        if entry.occupied {
            if entry.sequence == sequence {
                self.duplicates += 1;
                return;
            }
            // Only reachable before playout starts; the newer frame wins
            self.level -= 1;
        }

        let len = payload.len().min(FRAME_MONO_SAMPLES);
        entry.samples[..len].copy_from_slice(&payload[..len]);
        entry.samples[len..].fill(0);
        entry.sequence = sequence;
        entry.timestamp = timestamp;
        entry.occupied = true;

        self.level += 1;
        self.received += 1;
    }

    fn get(&mut self, output: &mut [i16], frame_size: usize) -> JitterStatus {
        let wanted = (frame_size * 2).min(output.len());

        let next = match self.next_sequence {
            Some(next) => next,
            None if self.level >= self.min_delay => {
                let start = self.lowest_pending.take().unwrap_or(0);
                self.next_sequence = Some(start);
                start
            }
            None => {
                output.fill(0);
                return JitterStatus::Buffering;
            }
        };

        let index = (next & self.mask) as usize;
        let entry = &mut self.entries[index];
        if entry.occupied && entry.sequence == next {
            let len = wanted.min(FRAME_MONO_SAMPLES);
            output[..len].copy_from_slice(&entry.samples[..len]);
            output[len..].fill(0);
            entry.occupied = false;
            self.last_timestamp = entry.timestamp;
            self.level -= 1;
            JitterStatus::Ok
        } else {
            output.fill(0);
            self.lost += 1;
            JitterStatus::Missing
        }
    }

    fn tick(&mut self) {
        // Sequence numbers come off the wire; never overflow on them
        if let Some(next) = self.next_sequence.as_mut() {
            *next = next.wrapping_add(1);
        }
    }

    /// Waits for `min_delay` frames again before playing
    fn reset(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.occupied = false;
        }
        self.next_sequence = None;
        self.lowest_pending = None;
        self.level = 0;
    }

    fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.level,
            capacity: self.entries.len(),
            received: self.received,
            lost: self.lost,
            late: self.late,
            duplicates: self.duplicates,
            resyncs: self.resyncs,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub received: u64,
    pub lost: u64,
    pub late: u64,
    pub duplicates: u64,
    pub resyncs: u64,
}

impl JitterBufferStats {
    pub fn loss_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.lost as f32 / (self.received + self.lost) as f32
        }
    }
}
