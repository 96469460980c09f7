//! Sender and receiver pipelines
//!
//! A process runs one of the two. Each owns its state in an explicit
//! session context so several sessions (or tests) can coexist.

pub mod capture;
pub mod playout;
pub mod staleness;

pub use capture::{CaptureSession, CaptureStats, EncodeWorker, PacketSink, SendCompletion};
pub use playout::{run_receiver, PlayoutSession, PlayoutStats, RenderOutcome};
pub use staleness::{SessionState, StalenessTracker};
