//! Sender pipeline
//!
//! ```text
//! capture callback ──▶ raw pool ──▶ EncodeWorker ──▶ encoded pool ──▶ PacketSink
//!   (real-time)         mark        encode, unmark     (marked=free)   completion marks
//! ```
//!
//! The capture callback never waits: when the raw pool is full the frame
//! is dropped and counted. The worker is the only party that blocks, and
//! only off the real-time path.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::frame::{EncodedFrame, Frame};
use crate::audio::pool::{PoolStats, SlotId, SlotPool};
use crate::codec::FrameEncoder;
use crate::error::{Error, NetworkError};
use crate::protocol;

/// Frames between periodic stats lines (5 s)
const STATS_INTERVAL_FRAMES: u64 = 1000;

/// Destination for finished wire packets
///
/// Implementations may send asynchronously but must eventually call
/// [`SendCompletion::complete`] (or drop the completion) so the encoded
/// slot is recycled.
pub trait PacketSink: Send + Sync {
    fn send(&self, packet: Bytes, completion: SendCompletion);
}

#[derive(Default)]
struct CaptureCounters {
    captured: AtomicU64,
    encoded: AtomicU64,
    encode_errors: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Everything one sending session owns
pub struct CaptureSession {
    raw: SlotPool<Frame>,
    encoded: SlotPool<EncodedFrame>,
    next_sequence: AtomicU64,
    counters: CaptureCounters,
}

impl CaptureSession {
    /// Create a session with `pool_capacity` slots in each pool
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            raw: SlotPool::new(pool_capacity, Frame::silent),
            encoded: SlotPool::new_marked(pool_capacity, EncodedFrame::empty),
            next_sequence: AtomicU64::new(0),
            counters: CaptureCounters::default(),
        }
    }

    /// Real-time capture tick
    ///
    /// Assigns the next sequence number and hands the samples to the
    /// encoder. Returns the sequence number if the frame was queued, `None`
    /// if it was dropped because every raw slot is busy.
    pub fn on_capture(&self, samples: &[i16]) -> Option<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.captured.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = self.raw.acquire_unmarked() else {
            let dropped = self.raw.record_drop();
            tracing::trace!(sequence, dropped, "Raw pool exhausted, dropping frame");
            return None;
        };

        self.raw.with_data(&slot, |frame| frame.fill_from(sequence, samples));
        self.raw.mark(slot);
        Some(sequence)
    }

    /// Stop the worker once queued frames are drained
    pub fn close(&self) {
        self.raw.close();
        self.encoded.close();
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captured: self.counters.captured.load(Ordering::Relaxed),
            dropped: self.raw.dropped(),
            encoded: self.counters.encoded.load(Ordering::Relaxed),
            encode_errors: self.counters.encode_errors.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            raw_pool: self.raw.stats(),
            encoded_pool: self.encoded.stats(),
        }
    }

    /// Take one captured frame and turn it into a wire packet
    ///
    /// Returns `None` when the session is closed and drained.
    fn encode_next<E: FrameEncoder + ?Sized>(
        &self,
        encoder: &mut E,
    ) -> Option<Result<(SlotId, Bytes), Error>> {
        let raw = self.raw.wait_marked()?;

        // Blocks while every encoded slot is still in flight
        let Some(out) = self.encoded.wait_marked() else {
            self.raw.unmark(raw);
            return None;
        };

        let encoded = self.raw.with_data(&raw, |frame| {
            self.encoded.with_data(&out, |encoded| encoder.encode(frame, encoded))
        });
        self.raw.unmark(raw);

        let packet = encoded.map_err(Error::from).and_then(|()| {
            self.encoded.with_data(&out, |encoded| {
                protocol::encode(encoded.sequence, encoded.payload()).map_err(Error::from)
            })
        });

        match packet {
            Ok(packet) => Some(Ok((out, packet))),
            Err(e) => {
                // Nothing to send; the slot is free again
                self.encoded.mark(out);
                Some(Err(e))
            }
        }
    }
}

/// Sender counters
#[derive(Debug, Clone)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped: u64,
    pub encoded: u64,
    pub encode_errors: u64,
    pub sent: u64,
    pub send_errors: u64,
    pub raw_pool: PoolStats,
    pub encoded_pool: PoolStats,
}

/// Releases an encoded slot once its datagram has been sent
///
/// Dropping an uncompleted `SendCompletion` releases the slot too, so a
/// cancelled send never leaks pool capacity.
pub struct SendCompletion {
    session: Arc<CaptureSession>,
    slot: Option<SlotId>,
    sequence: u64,
}

impl SendCompletion {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Report the send outcome and free the slot
    pub fn complete(mut self, result: Result<(), NetworkError>) {
        match result {
            Ok(()) => {
                self.session.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.session.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Send of frame {} failed: {}", self.sequence, e);
            }
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.session.encoded.mark(slot);
        }
    }
}

impl Drop for SendCompletion {
    fn drop(&mut self) {
        self.release();
    }
}

/// Dedicated encode thread
pub struct EncodeWorker {
    session: Arc<CaptureSession>,
    thread_handle: Option<JoinHandle<()>>,
}

impl EncodeWorker {
    /// Spawn the worker; it runs until the session is closed
    pub fn spawn<E, S>(session: Arc<CaptureSession>, encoder: E, sink: Arc<S>) -> Result<Self, Error>
    where
        E: FrameEncoder + 'static,
        S: PacketSink + ?Sized + 'static,
    {
        let worker_session = session.clone();
        let handle = thread::Builder::new()
            .name("encode-worker".into())
            .spawn(move || run_encoder(worker_session, encoder, sink))?;

        Ok(Self {
            session,
            thread_handle: Some(handle),
        })
    }

    /// Close the session and wait for the worker to drain and exit
    pub fn stop(&mut self) {
        self.session.close();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Encode worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_encoder<E, S>(session: Arc<CaptureSession>, mut encoder: E, sink: Arc<S>)
where
    E: FrameEncoder,
    S: PacketSink + ?Sized,
{
    tracing::debug!("Encode worker started");

    while let Some(result) = session.encode_next(&mut encoder) {
        let (slot, packet) = match result {
            Ok(ready) => ready,
            Err(e) => {
                session.counters.encode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Skipping frame: {}", e);
                continue;
            }
        };

        let sequence = session.encoded.with_data(&slot, |encoded| encoded.sequence);
        let encoded = session.counters.encoded.fetch_add(1, Ordering::Relaxed) + 1;

        sink.send(
            packet,
            SendCompletion {
                session: session.clone(),
                slot: Some(slot),
                sequence,
            },
        );

        if encoded % STATS_INTERVAL_FRAMES == 0 {
            let stats = session.stats();
            tracing::info!(
                "Stats: {} captured, {} dropped, {} encoded, {} sent, {} send errors",
                stats.captured,
                stats.dropped,
                stats.encoded,
                stats.sent,
                stats.send_errors
            );
        }
    }

    tracing::debug!("Encode worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmCodec;
    use crate::constants::FRAME_MONO_SAMPLES;
    use crate::error::CodecError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectSink {
        packets: Mutex<Vec<Bytes>>,
    }

    impl PacketSink for CollectSink {
        fn send(&self, packet: Bytes, completion: SendCompletion) {
            self.packets.lock().push(packet);
            completion.complete(Ok(()));
        }
    }

    /// Holds completions so encoded slots stay in flight
    #[derive(Default)]
    struct StallSink {
        pending: Mutex<Vec<SendCompletion>>,
    }

    impl PacketSink for StallSink {
        fn send(&self, _packet: Bytes, completion: SendCompletion) {
            self.pending.lock().push(completion);
        }
    }

    struct FailingEncoder;

    impl FrameEncoder for FailingEncoder {
        fn encode(&mut self, _frame: &Frame, _out: &mut EncodedFrame) -> Result<(), CodecError> {
            Err(CodecError::EncodingFailed("test".into()))
        }
    }

    #[test]
    fn test_capture_drops_when_pool_full() {
        let session = CaptureSession::new(8);
        let samples = [0i16; FRAME_MONO_SAMPLES];

        let queued: Vec<_> = (0..10).map(|_| session.on_capture(&samples)).collect();

        let expected: Vec<Option<u64>> = (1..=8).map(Some).chain([None, None]).collect();
        assert_eq!(queued, expected);
        let stats = session.stats();
        assert_eq!(stats.captured, 10);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.raw_pool.marked, 8);
    }

    #[test]
    fn test_worker_sends_in_capture_order() {
        let session = Arc::new(CaptureSession::new(4));
        let sink = Arc::new(CollectSink::default());

        for i in 0..4 {
            session.on_capture(&[i as i16; FRAME_MONO_SAMPLES]);
        }
        session.close();

        EncodeWorker::spawn(session.clone(), PcmCodec, sink.clone())
            .unwrap()
            .stop();

        let sequences: Vec<u64> = sink
            .packets
            .lock()
            .iter()
            .map(|p| protocol::decode(p).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        let stats = session.stats();
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.encoded_pool.marked, 4);
        assert_eq!(stats.raw_pool.unmarked, 4);
    }

    #[test]
    fn test_encode_failure_frees_both_slots() {
        let session = Arc::new(CaptureSession::new(2));
        let sink = Arc::new(CollectSink::default());

        session.on_capture(&[1; FRAME_MONO_SAMPLES]);
        session.on_capture(&[2; FRAME_MONO_SAMPLES]);
        session.close();

        EncodeWorker::spawn(session.clone(), FailingEncoder, sink.clone())
            .unwrap()
            .stop();

        let stats = session.stats();
        assert_eq!(stats.encode_errors, 2);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.encoded_pool.marked, 2);
        assert_eq!(stats.raw_pool.unmarked, 2);
        assert!(sink.packets.lock().is_empty());
    }

    #[test]
    fn test_in_flight_sends_bound_encoding() {
        let session = Arc::new(CaptureSession::new(2));
        let sink = Arc::new(StallSink::default());
        let mut worker = EncodeWorker::spawn(session.clone(), PcmCodec, sink.clone()).unwrap();

        for _ in 0..4 {
            session.on_capture(&[0; FRAME_MONO_SAMPLES]);
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        // Both encoded slots are stuck in flight, so the worker holds one
        // raw frame while waiting and the other is still marked
        wait_until(|| sink.pending.lock().len() == 2 && session.stats().raw_pool.marked == 1);
        let stats = session.stats();
        assert_eq!(stats.encoded, 2);
        assert_eq!(stats.encoded_pool.held, 2);
        assert_eq!(stats.dropped, 0);

        // Completing the sends lets the worker pick up frames 3 and 4
        complete_all(&sink);
        wait_until(|| sink.pending.lock().len() == 2);

        session.close();
        complete_all(&sink);
        worker.stop();
        assert!(!worker.is_running());

        let stats = session.stats();
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.encoded_pool.marked, 2);
    }

    fn complete_all(sink: &StallSink) {
        let pending = std::mem::take(&mut *sink.pending.lock());
        for completion in pending {
            completion.complete(Ok(()));
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn test_dropped_completion_releases_slot() {
        let session = Arc::new(CaptureSession::new(1));
        let slot = session.encoded.wait_marked().unwrap();
        assert_eq!(session.stats().encoded_pool.marked, 0);

        drop(SendCompletion {
            session: session.clone(),
            slot: Some(slot),
            sequence: 1,
        });
        assert_eq!(session.stats().encoded_pool.marked, 1);
    }
}
