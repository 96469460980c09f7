//! Receiver pipeline
//!
//! The receive loop decodes datagrams into the jitter buffer; the render
//! callback pulls one frame per period. Both share the jitter buffer
//! through a single mutex held only for `put` or `get` + `tick`. When the
//! stream goes stale the render callback plays comfort silence without
//! touching the lock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::staleness::{SessionState, StalenessTracker};
use crate::audio::frame::Frame;
use crate::audio::jitter::{JitterBuffer, JitterBufferStats, JitterStatus};
use crate::codec::FrameDecoder;
use crate::constants::{CHANNELS, MAX_PACKET_SIZE};
use crate::error::{Error, NetworkError};
use crate::protocol;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// What the render callback produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Stream idle or stale; output is all zeros
    Silence,
    /// Output came from the jitter buffer
    Played(JitterStatus),
}

#[derive(Default)]
struct PlayoutCounters {
    received: AtomicU64,
    malformed: AtomicU64,
    decode_errors: AtomicU64,
    rendered: AtomicU64,
    silent: AtomicU64,
}

/// Everything one receiving session owns
pub struct PlayoutSession<J> {
    jitter: Mutex<J>,
    staleness: StalenessTracker,
    counters: PlayoutCounters,
}

impl<J: JitterBuffer> PlayoutSession<J> {
    pub fn new(jitter: J, stale_window: Duration) -> Self {
        Self {
            jitter: Mutex::new(jitter),
            staleness: StalenessTracker::new(stale_window),
            counters: PlayoutCounters::default(),
        }
    }

    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    /// Feed one datagram into the jitter buffer
    ///
    /// Returns the frame's sequence number. Malformed or undecodable
    /// datagrams are counted and returned as errors; the session is left
    /// untouched.
    pub fn on_datagram<D>(&self, datagram: &[u8], decoder: &mut D, now: Instant) -> Result<u64, Error>
    where
        D: FrameDecoder + ?Sized,
    {
        if datagram.len() > MAX_PACKET_SIZE {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            return Err(NetworkError::PacketTooLarge(datagram.len()).into());
        }

        let packet = protocol::decode(datagram).map_err(|e| {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            Error::from(e)
        })?;

        let mut frame = Frame::silent();
        decoder.decode(packet.payload, &mut frame).map_err(|e| {
            self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            Error::from(e)
        })?;

        let previous = self.staleness.record_packet(now);
        {
            let mut jitter = self.jitter.lock();
            if previous == SessionState::Idle {
                // Restart playout at the arriving frame rather than conceal the outage
                jitter.reset();
            }
            jitter.put(&frame.samples, packet.timestamp(), packet.sequence);
        }

        let received = self.counters.received.fetch_add(1, Ordering::Relaxed) + 1;
        if previous == SessionState::Idle {
            if received == 1 {
                tracing::info!("Stream started at frame {}", packet.sequence);
            } else {
                tracing::info!("Stream resumed at frame {}", packet.sequence);
            }
        }

        Ok(packet.sequence)
    }

    /// Real-time render tick: fill `out` with one frame
    pub fn render(&self, out: &mut [i16], now: Instant) -> RenderOutcome {
        self.counters.rendered.fetch_add(1, Ordering::Relaxed);

        if self.staleness.is_stale(now) {
            out.fill(0);
            self.counters.silent.fetch_add(1, Ordering::Relaxed);
            return RenderOutcome::Silence;
        }

        let status = {
            let mut jitter = self.jitter.lock();
            let status = jitter.get(out, out.len() / CHANNELS as usize);
            jitter.tick();
            status
        };
        RenderOutcome::Played(status)
    }

    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            received: self.counters.received.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            rendered: self.counters.rendered.load(Ordering::Relaxed),
            silent: self.counters.silent.load(Ordering::Relaxed),
            jitter: self.jitter.lock().stats(),
        }
    }
}

/// Receiver counters
#[derive(Debug, Clone)]
pub struct PlayoutStats {
    pub received: u64,
    pub malformed: u64,
    pub decode_errors: u64,
    pub rendered: u64,
    pub silent: u64,
    pub jitter: JitterBufferStats,
}

/// Receive datagrams until `shutdown` flips to `true`
///
/// Bad datagrams are logged and dropped; the loop only ends on shutdown.
pub async fn run_receiver<J, D>(
    socket: UdpSocket,
    session: Arc<PlayoutSession<J>>,
    mut decoder: D,
    mut shutdown: watch::Receiver<bool>,
) where
    J: JitterBuffer,
    D: FrameDecoder,
{
    // One spare byte so oversized datagrams are detected rather than truncated to fit
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
    let mut last_stats = Instant::now();

    if let Ok(addr) = socket.local_addr() {
        tracing::info!(
            "Receiving on {}, silence after {:?} without packets",
            addr,
            session.staleness().window()
        );
    }

    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    if let Err(e) = session.on_datagram(&buf[..len], &mut decoder, Instant::now()) {
                        tracing::warn!("Dropping datagram from {}: {}", peer, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("{}", NetworkError::ReceiveFailed(e.to_string()));
                }
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            let stats = session.stats();
            tracing::info!(
                "Receiver stats: {} received, {} malformed, {} undecodable, {} silent renders, jitter {}/{} ({:.1}% loss)",
                stats.received,
                stats.malformed,
                stats.decode_errors,
                stats.silent,
                stats.jitter.level,
                stats.jitter.capacity,
                stats.jitter.loss_rate() * 100.0
            );
        }
    }

    tracing::info!("Receive loop stopped");
}
